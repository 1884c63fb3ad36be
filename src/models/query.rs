//! Compiles the declarative search grammar into the document store's
//! query dialect.

use serde_json::{json, Map, Value};

use super::aggregations::build_aggregations;
use super::attrs::{dedot, to_attr, AttrType, Scope};
use super::filters::{
    FilterPredicate, SearchParams, SortOrder, ValidationError, DEFAULT_PAGE, DEFAULT_PER_PAGE,
};
use super::{AggregateParams, FIELD_ID, FIELD_TENANT_ID};

/// Geo filters target a dedicated geo_point field
pub const FIELD_LOCATION: &str = "location";

/// A composite boolean query under construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    must: Vec<Value>,
    must_not: Vec<Value>,
    sort: Vec<Value>,
    fields: Vec<String>,
    from: u64,
    size: u64,
    aggs: Option<Value>,
}

impl Query {
    pub fn new() -> Self {
        Self {
            size: DEFAULT_PER_PAGE,
            ..Default::default()
        }
    }

    pub fn must(mut self, clause: Value) -> Self {
        self.must.push(clause);
        self
    }

    pub fn must_not(mut self, clause: Value) -> Self {
        self.must_not.push(clause);
        self
    }

    pub fn with_sort(mut self, clause: Value) -> Self {
        self.sort.push(clause);
        self
    }

    pub fn with_page(mut self, page: u64, per_page: u64) -> Self {
        let page = if page == 0 { DEFAULT_PAGE } else { page };
        let per_page = if per_page == 0 { DEFAULT_PER_PAGE } else { per_page };
        self.from = (page - 1) * per_page;
        self.size = per_page;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn with_aggregations(mut self, aggs: Value) -> Self {
        self.aggs = Some(aggs);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Render the request body
    pub fn to_value(&self) -> Value {
        let query = if self.must.is_empty() && self.must_not.is_empty() {
            json!({"match_all": {}})
        } else {
            let mut boolq = Map::new();
            if !self.must.is_empty() {
                boolq.insert("must".to_string(), Value::Array(self.must.clone()));
            }
            if !self.must_not.is_empty() {
                boolq.insert("must_not".to_string(), Value::Array(self.must_not.clone()));
            }
            json!({ "bool": boolq })
        };

        let mut body = Map::new();
        body.insert("query".to_string(), query);
        body.insert("from".to_string(), json!(self.from));
        body.insert("size".to_string(), json!(self.size));
        if !self.sort.is_empty() {
            body.insert("sort".to_string(), Value::Array(self.sort.clone()));
        }
        if !self.fields.is_empty() {
            body.insert("fields".to_string(), json!(self.fields));
            body.insert("_source".to_string(), Value::Bool(false));
        }
        if let Some(aggs) = &self.aggs {
            body.insert("aggs".to_string(), aggs.clone());
        }
        Value::Object(body)
    }
}

/// Compile search parameters into a query.
///
/// Three conjunctive layers: the mandatory tenant term, the RBAC group
/// scope, and one clause per user filter. Inventory attribute names are
/// expected to have been through the mapper already.
pub fn build_query(params: &SearchParams) -> Result<Query, ValidationError> {
    let mut query = Query::new().with_page(params.page, params.per_page);

    if !params.tenant_id.is_empty() {
        query = query.must(json!({
            "term": { FIELD_TENANT_ID: params.tenant_id }
        }));
    }

    if !params.groups.is_empty() {
        let group_field = to_attr(Scope::System, "group", AttrType::Str);
        query = query.must(json!({
            "terms": { group_field: params.groups }
        }));
    }

    if !params.device_ids.is_empty() {
        query = query.must(json!({
            "terms": { FIELD_ID: params.device_ids }
        }));
    }

    for filter in &params.filters {
        query = apply_filter(query, filter)?;
    }

    if let Some(geo) = &params.geo_distance_filter {
        query = query.must(json!({
            "geo_distance": {
                "distance": geo.geo_distance.distance,
                FIELD_LOCATION: {
                    "lat": geo.geo_distance.location.lat,
                    "lon": geo.geo_distance.location.lon,
                },
            }
        }));
    }

    if let Some(geo) = &params.geo_bounding_box_filter {
        query = query.must(json!({
            "geo_bounding_box": {
                FIELD_LOCATION: {
                    "top_left": {
                        "lat": geo.geo_bounding_box.location.top_left.lat,
                        "lon": geo.geo_bounding_box.location.top_left.lon,
                    },
                    "bottom_right": {
                        "lat": geo.geo_bounding_box.location.bottom_right.lat,
                        "lon": geo.geo_bounding_box.location.bottom_right.lon,
                    },
                }
            }
        }));
    }

    for criteria in &params.sort {
        let scope: Scope = criteria
            .scope
            .parse()
            .map_err(|_| ValidationError::InvalidScope)?;
        let order: SortOrder = criteria
            .order
            .parse()
            .map_err(|_| ValidationError::InvalidSortOrder)?;
        let field = to_attr(scope, &criteria.attribute, AttrType::Str);
        query = query.with_sort(json!({
            field: { "order": order.to_string(), "unmapped_type": "keyword" }
        }));
    }

    if !params.attributes.is_empty() {
        query = query.with_field(FIELD_ID).with_field(FIELD_TENANT_ID);
        for attr in &params.attributes {
            let scope: Scope = attr
                .scope
                .parse()
                .map_err(|_| ValidationError::InvalidScope)?;
            // project every typed variant of the attribute
            query = query.with_field(format!("{}_{}_*", scope, dedot(&attr.attribute)));
        }
    }

    Ok(query)
}

/// Compile aggregate parameters: the filter layers of a search plus the
/// aggregation tree, with no hits returned.
pub fn build_aggregate_query(params: &AggregateParams) -> Result<Query, ValidationError> {
    let search = SearchParams {
        filters: params.filters.clone(),
        groups: params.groups.clone(),
        tenant_id: params.tenant_id.clone(),
        ..Default::default()
    };
    let aggs = build_aggregations(&params.aggregations)?;
    Ok(build_query(&search)?.with_size(0).with_aggregations(aggs))
}

fn apply_filter(query: Query, filter: &FilterPredicate) -> Result<Query, ValidationError> {
    let scope: Scope = filter
        .scope
        .parse()
        .map_err(|_| ValidationError::InvalidScope)?;
    let (typ, _) = filter.value_type()?;
    let field = to_attr(scope, &filter.attribute, typ);
    let str_field = to_attr(scope, &filter.attribute, AttrType::Str);

    let query = match filter.filter_type.as_str() {
        "$eq" => query.must(json!({ "term": { field: filter.value } })),
        "$ne" => query.must_not(json!({ "term": { field: filter.value } })),
        "$in" => query.must(json!({ "terms": { field: filter.value } })),
        "$nin" => query.must_not(json!({ "terms": { field: filter.value } })),
        "$gt" => query.must(json!({ "range": { field: { "gt": filter.value } } })),
        "$gte" => query.must(json!({ "range": { field: { "gte": filter.value } } })),
        "$lt" => query.must(json!({ "range": { field: { "lt": filter.value } } })),
        "$lte" => query.must(json!({ "range": { field: { "lte": filter.value } } })),
        "$exists" => {
            let positive = filter
                .value
                .as_bool()
                .ok_or(ValidationError::ExistsValueNotBool)?;
            let clause = json!({ "exists": { "field": str_field } });
            if positive {
                query.must(clause)
            } else {
                query.must_not(clause)
            }
        }
        "$regex" => query.must(json!({
            "regexp": { str_field: { "value": filter.value } }
        })),
        _ => return Err(ValidationError::InvalidFilterType),
    };
    Ok(query)
}
