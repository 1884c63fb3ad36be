//! Attribute codec: flat field identifiers of the form
//! `<scope>_<dedotted-name>_<typesuffix>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

/// Upper bound on mapped inventory attributes per tenant
pub const MAX_MAPPING_INVENTORY_ATTRIBUTES: usize = 100;

/// Dots are not legal inside a flat field name; they are swapped for a
/// fullwidth full stop on write and restored on read.
const DOT_REPLACEMENT: char = '\u{FF0E}';

#[derive(Error, Debug, PartialEq)]
pub enum AttributeError {
    #[error("unknown attribute scope {0}")]
    UnknownScope(String),

    #[error("unknown attribute value type: {0}")]
    UnknownValueType(Value),

    #[error("attribute array has mixed value types")]
    MixedArray,
}

/// Attribute namespace
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Scope {
    Identity,
    Inventory,
    System,
    Tags,
    Monitor,
    Custom,
}

/// Attribute value category, doubling as the field name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum AttrType {
    Str,
    Num,
    Bool,
}

/// Typed attribute value; setting one category clears the others by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Strs(Vec<String>),
    Num(f64),
    Nums(Vec<f64>),
    Bool(bool),
    Bools(Vec<bool>),
}

impl AttrValue {
    /// Build a typed value from a raw JSON value, dispatching on the value's
    /// runtime category. Mixed-type arrays are rejected.
    pub fn from_json(val: &Value) -> Result<Self, AttributeError> {
        match val {
            Value::String(s) => Ok(AttrValue::Str(s.clone())),
            Value::Number(n) => n
                .as_f64()
                .map(AttrValue::Num)
                .ok_or_else(|| AttributeError::UnknownValueType(val.clone())),
            Value::Bool(b) => Ok(AttrValue::Bool(*b)),
            Value::Array(items) => {
                let first = items
                    .first()
                    .ok_or_else(|| AttributeError::UnknownValueType(val.clone()))?;
                match first {
                    Value::String(_) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            match item {
                                Value::String(s) => out.push(s.clone()),
                                _ => return Err(AttributeError::MixedArray),
                            }
                        }
                        Ok(AttrValue::Strs(out))
                    }
                    Value::Number(_) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            match item.as_f64() {
                                Some(n) => out.push(n),
                                None => return Err(AttributeError::MixedArray),
                            }
                        }
                        Ok(AttrValue::Nums(out))
                    }
                    Value::Bool(_) => {
                        let mut out = Vec::with_capacity(items.len());
                        for item in items {
                            match item {
                                Value::Bool(b) => out.push(*b),
                                _ => return Err(AttributeError::MixedArray),
                            }
                        }
                        Ok(AttrValue::Bools(out))
                    }
                    _ => Err(AttributeError::UnknownValueType(first.clone())),
                }
            }
            _ => Err(AttributeError::UnknownValueType(val.clone())),
        }
    }

    pub fn attr_type(&self) -> AttrType {
        match self {
            AttrValue::Str(_) | AttrValue::Strs(_) => AttrType::Str,
            AttrValue::Num(_) | AttrValue::Nums(_) => AttrType::Num,
            AttrValue::Bool(_) | AttrValue::Bools(_) => AttrType::Bool,
        }
    }

    /// Values are stored in array form so that single- and multi-valued
    /// attributes share a field.
    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Str(s) => Value::Array(vec![Value::String(s.clone())]),
            AttrValue::Strs(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
            AttrValue::Num(n) => serde_json::json!([n]),
            AttrValue::Nums(items) => serde_json::json!(items),
            AttrValue::Bool(b) => Value::Array(vec![Value::Bool(*b)]),
            AttrValue::Bools(items) => Value::Array(items.iter().map(|b| Value::Bool(*b)).collect()),
        }
    }

    /// First string value, for promoted fields like `status`
    pub fn first_string(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Strs(items) => items.first().map(String::as_str),
            _ => None,
        }
    }
}

/// A single device attribute with its namespace
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryAttribute {
    pub scope: Scope,
    pub name: String,
    pub value: AttrValue,
}

impl InventoryAttribute {
    pub fn new(scope: Scope, name: impl Into<String>, value: AttrValue) -> Self {
        Self {
            scope,
            name: name.into(),
            value,
        }
    }

    /// Flat field identifier + JSON value for the indexed document
    pub fn to_field(&self) -> (String, Value) {
        let field = to_attr(self.scope, &self.name, self.value.attr_type());
        (field, self.value.to_json())
    }
}

/// An attribute reference without a value, as used by filters, sort
/// criteria, and the mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedName {
    pub scope: Scope,
    pub name: String,
}

impl ScopedName {
    pub fn new(scope: Scope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

/// Replace dots, which the document store would treat as path separators
pub fn dedot(name: &str) -> String {
    name.replace('.', &DOT_REPLACEMENT.to_string())
}

/// Restore dots hidden by [`dedot`]
pub fn redot(name: &str) -> String {
    name.replace(DOT_REPLACEMENT, ".")
}

/// Compose the flat field identifier for `(scope, name, type)`
pub fn to_attr(scope: Scope, name: &str, typ: AttrType) -> String {
    format!("{}_{}_{}", scope, dedot(name), typ)
}

/// Decide whether a document field is an encoded attribute and split it
/// into `(scope, name)`.
///
/// The name may itself contain scope or type literals, so the split happens
/// at the first underscore after a valid scope prefix and the last
/// underscore before a valid type suffix. Fields that match neither side
/// are fixed fields and yield `None`.
pub fn maybe_parse_attr(field: &str) -> Option<(Scope, String)> {
    let scope = Scope::iter().find(|s| {
        field
            .strip_prefix(&s.to_string())
            .map_or(false, |rest| rest.starts_with('_'))
    })?;

    let has_type_suffix = AttrType::iter().any(|t| field.ends_with(&format!("_{}", t)));
    if !has_type_suffix {
        return None;
    }

    let start = field.find('_')?;
    let end = field.rfind('_')?;
    if end <= start + 1 {
        return None;
    }

    Some((scope, field[start + 1..end].to_string()))
}
