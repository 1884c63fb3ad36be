//! Declarative search grammar: filters, sort criteria, projections

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;

use super::attrs::{AttrType, AttributeError, Scope};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_PER_PAGE: u64 = 20;

const VALID_SELECTORS: &[&str] = &[
    "$eq", "$gt", "$gte", "$in", "$lt", "$lte", "$ne", "$nin", "$exists", "$regex",
];

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("scope: cannot be blank")]
    MissingScope,

    #[error("scope: must be a valid value")]
    InvalidScope,

    #[error("attribute: cannot be blank")]
    MissingAttribute,

    #[error("type: must be a valid value")]
    InvalidFilterType,

    #[error("order: must be a valid value")]
    InvalidSortOrder,

    #[error("value: cannot be blank")]
    MissingValue,

    #[error("value: must be a boolean")]
    ExistsValueNotBool,

    #[error("name: cannot be blank")]
    MissingName,

    #[error("aggregations: the length must be between 1 and {0}")]
    AggregationCount(usize),

    #[error("limit: must be no greater than {0}")]
    AggregationLimit(usize),

    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

/// Sort direction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One filter predicate: `{scope, attribute, type, value}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub scope: String,
    pub attribute: String,
    #[serde(rename = "type")]
    pub filter_type: String,
    pub value: Value,
}

impl FilterPredicate {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scope.is_empty() {
            return Err(ValidationError::MissingScope);
        }
        if self.attribute.is_empty() {
            return Err(ValidationError::MissingAttribute);
        }
        if !VALID_SELECTORS.contains(&self.filter_type.as_str()) {
            return Err(ValidationError::InvalidFilterType);
        }
        if self.value.is_null() {
            return Err(ValidationError::MissingValue);
        }
        Ok(())
    }

    /// Actual type info of the value: `(type, is_array)`
    pub fn value_type(&self) -> Result<(AttrType, bool), ValidationError> {
        match &self.value {
            Value::Bool(_) => Ok((AttrType::Bool, false)),
            Value::Number(_) => Ok((AttrType::Num, false)),
            Value::String(_) => Ok((AttrType::Str, false)),
            Value::Array(items) => {
                let first = items
                    .first()
                    .ok_or_else(|| AttributeError::UnknownValueType(self.value.clone()))?;
                let typ = match first {
                    Value::Bool(_) => AttrType::Bool,
                    Value::Number(_) => AttrType::Num,
                    Value::String(_) => AttrType::Str,
                    other => {
                        return Err(AttributeError::UnknownValueType(other.clone()).into());
                    }
                };
                for item in items {
                    let item_typ = match item {
                        Value::Bool(_) => AttrType::Bool,
                        Value::Number(_) => AttrType::Num,
                        Value::String(_) => AttrType::Str,
                        other => {
                            return Err(AttributeError::UnknownValueType(other.clone()).into());
                        }
                    };
                    if item_typ != typ {
                        return Err(AttributeError::MixedArray.into());
                    }
                }
                Ok((typ, true))
            }
            other => Err(AttributeError::UnknownValueType(other.clone()).into()),
        }
    }
}

/// Sort criteria on one attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortCriteria {
    pub scope: String,
    pub attribute: String,
    pub order: String,
}

impl SortCriteria {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scope.is_empty() {
            return Err(ValidationError::MissingScope);
        }
        if self.attribute.is_empty() {
            return Err(ValidationError::MissingAttribute);
        }
        self.order
            .parse::<SortOrder>()
            .map_err(|_| ValidationError::InvalidSortOrder)?;
        Ok(())
    }
}

/// Attribute selected for projection in search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectAttribute {
    pub scope: String,
    pub attribute: String,
}

impl SelectAttribute {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scope.is_empty() {
            return Err(ValidationError::MissingScope);
        }
        if self.attribute.is_empty() {
            return Err(ValidationError::MissingAttribute);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f32,
    pub lon: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoDistance {
    pub distance: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoDistanceFilter {
    pub geo_distance: GeoDistance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub location: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBoxFilter {
    pub geo_bounding_box: GeoBoundingBox,
}

/// Search request parameters. `groups` and `tenant_id` never come from the
/// request body; they are injected from the caller's identity and RBAC
/// scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub per_page: u64,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_distance_filter: Option<GeoDistanceFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_bounding_box_filter: Option<GeoBoundingBoxFilter>,
    #[serde(default)]
    pub sort: Vec<SortCriteria>,
    #[serde(default)]
    pub attributes: Vec<SelectAttribute>,
    #[serde(default)]
    pub device_ids: Vec<String>,
    #[serde(skip)]
    pub groups: Vec<String>,
    #[serde(skip)]
    pub tenant_id: String,
}

impl SearchParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for f in &self.filters {
            f.validate()?;
        }
        for s in &self.sort {
            s.validate()?;
        }
        for a in &self.attributes {
            a.validate()?;
        }
        Ok(())
    }
}

/// A searchable attribute as surfaced to API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterAttribute {
    pub name: String,
    pub scope: Scope,
    pub count: u32,
}
