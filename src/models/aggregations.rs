//! Terms aggregations over device attributes

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::attrs::{to_attr, AttrType, Scope};
use super::filters::{FilterPredicate, ValidationError};

pub const DEFAULT_AGGREGATION_LIMIT: u64 = 10;
pub const MAX_AGGREGATION_TERMS: usize = 100;

/// One node of the aggregation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationTerm {
    pub name: String,
    pub attribute: String,
    pub scope: String,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub aggregations: Vec<AggregationTerm>,
}

/// Aggregation request parameters; like search, `groups` and `tenant_id`
/// are injected by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateParams {
    #[serde(default)]
    pub aggregations: Vec<AggregationTerm>,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    #[serde(skip)]
    pub groups: Vec<String>,
    #[serde(skip)]
    pub tenant_id: String,
}

impl AggregateParams {
    /// The term limit applies to the whole tree, not per level.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let total = count_terms(&self.aggregations);
        if total == 0 || total > MAX_AGGREGATION_TERMS {
            return Err(ValidationError::AggregationCount(MAX_AGGREGATION_TERMS));
        }
        for term in &self.aggregations {
            term.validate()?;
        }
        for f in &self.filters {
            f.validate()?;
        }
        Ok(())
    }
}

impl AggregationTerm {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.scope.is_empty() {
            return Err(ValidationError::MissingScope);
        }
        if self.attribute.is_empty() {
            return Err(ValidationError::MissingAttribute);
        }
        if self.limit as usize > MAX_AGGREGATION_TERMS {
            return Err(ValidationError::AggregationLimit(MAX_AGGREGATION_TERMS));
        }
        for sub in &self.aggregations {
            sub.validate()?;
        }
        Ok(())
    }
}

fn count_terms(terms: &[AggregationTerm]) -> usize {
    terms
        .iter()
        .map(|t| 1 + count_terms(&t.aggregations))
        .sum()
}

/// Recursively build the nested terms-aggregation clause
pub fn build_aggregations(terms: &[AggregationTerm]) -> Result<Value, ValidationError> {
    let mut aggs = Map::new();
    for term in terms {
        let scope: Scope = term
            .scope
            .parse()
            .map_err(|_| ValidationError::MissingScope)?;
        let limit = if term.limit == 0 {
            DEFAULT_AGGREGATION_LIMIT
        } else {
            term.limit
        };
        let mut agg = Map::new();
        agg.insert(
            "terms".to_string(),
            json!({
                "field": to_attr(scope, &term.attribute, AttrType::Str),
                "size": limit,
            }),
        );
        if !term.aggregations.is_empty() {
            agg.insert("aggs".to_string(), build_aggregations(&term.aggregations)?);
        }
        aggs.insert(term.name.clone(), Value::Object(agg));
    }
    Ok(Value::Object(aggs))
}

/// One named aggregation in an API response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAggregation {
    pub name: String,
    pub items: Vec<DeviceAggregationItem>,
    pub other_count: u64,
}

/// A single bucket of an aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAggregationItem {
    pub key: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub aggregations: Vec<DeviceAggregation>,
}
