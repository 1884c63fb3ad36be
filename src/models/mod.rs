//! Data model for indexed devices and the search grammar

pub mod aggregations;
pub mod attrs;
pub mod deployment;
pub mod device;
pub mod filters;
pub mod inventory;
pub mod job;
pub mod query;

pub use aggregations::{
    build_aggregations, AggregateParams, AggregationTerm, DeviceAggregation, DeviceAggregationItem,
};
pub use attrs::{
    dedot, maybe_parse_attr, redot, to_attr, AttrType, AttrValue, AttributeError, InventoryAttribute,
    Scope, ScopedName, MAX_MAPPING_INVENTORY_ATTRIBUTES,
};
pub use deployment::{DeploymentDevice, DeviceDeployment};
pub use device::{Device, DeviceMeta};
pub use filters::{
    FilterAttribute, FilterPredicate, SearchParams, SelectAttribute, SortCriteria, SortOrder,
    ValidationError,
};
pub use inventory::{InvDevice, InvDeviceAttribute};
pub use job::{Job, JobAction, KnownService};
pub use query::{build_aggregate_query, build_query, Query};

/// Fixed document field names
pub const FIELD_ID: &str = "id";
pub const FIELD_TENANT_ID: &str = "tenant_id";
pub const FIELD_NAME: &str = "name";
pub const FIELD_GROUP_NAME: &str = "group_name";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_UPDATED_AT: &str = "updated_at";

/// Well-known attribute names
pub const ATTR_NAME_STATUS: &str = "status";
pub const ATTR_NAME_GROUP: &str = "group";
pub const ATTR_NAME_UPDATED_TS: &str = "updated_ts";
pub const ATTR_NAME_CREATED_TS: &str = "created_ts";
pub const ATTR_NAME_LATEST_DEPLOYMENT_STATUS: &str = "latest_deployment_status";
