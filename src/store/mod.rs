//! Document store adapter

pub mod opensearch;
pub mod template;

pub use opensearch::OpenSearchStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::attrs::AttributeError;
use crate::models::Device;

/// Errors from the document store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request failed with status {status}: {message}")]
    Response { status: u16, message: String },

    #[error("can't process store response: {0}")]
    Parse(String),

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Bulk operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BulkKind {
    Index,
    Delete,
}

/// Target descriptor of a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkActionDesc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_index")]
    pub index: String,
    pub routing: String,
    #[serde(rename = "_if_seq_no", skip_serializing_if = "Option::is_none")]
    pub if_seq_no: Option<i64>,
    #[serde(rename = "_if_primary_term", skip_serializing_if = "Option::is_none")]
    pub if_primary_term: Option<i64>,
}

/// Action header line of a bulk operation
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    pub kind: BulkKind,
    pub desc: BulkActionDesc,
}

impl BulkAction {
    fn to_value(&self) -> Result<Value, StoreError> {
        let desc = serde_json::to_value(&self.desc)?;
        Ok(json!({ self.kind.to_string(): desc }))
    }
}

/// One operation of a bulk request: the action header plus, for index
/// operations, the document itself.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub action: BulkAction,
    pub doc: Option<Value>,
}

impl BulkItem {
    /// Render the newline-delimited wire form
    pub fn to_ndjson(&self) -> Result<String, StoreError> {
        let mut out = serde_json::to_string(&self.action.to_value()?)?;
        out.push('\n');
        if let Some(doc) = &self.doc {
            out.push_str(&serde_json::to_string(doc)?);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Capability contract of the document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Submit a batch of index/delete operations. Atomic per item; the
    /// caller inspects the response vector for partial failures.
    async fn bulk(&self, items: &[BulkItem]) -> Result<Value, StoreError>;

    /// Execute a search in the tenant's slice of the index
    async fn search(&self, tenant_id: &str, body: &Value) -> Result<Value, StoreError>;

    /// Execute an aggregation query; the caller reads `aggregations`
    async fn aggregate(&self, tenant_id: &str, body: &Value) -> Result<Value, StoreError> {
        self.search(tenant_id, body).await
    }

    /// Fetch devices by ID along with their concurrency tokens
    async fn get_devices(
        &self,
        tenant_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<Device>, StoreError>;

    /// Idempotently install the index template and create the index
    async fn migrate(&self) -> Result<(), StoreError>;

    /// Raw index definition, used to surface searchable attributes
    async fn get_index_mapping(&self, tenant_id: &str) -> Result<Value, StoreError>;

    /// Reachability check for the health endpoint
    async fn ping(&self) -> Result<(), StoreError>;

    /// Index name holding the tenant's devices
    fn devices_index(&self, tenant_id: &str) -> String;

    /// Routing key co-locating a tenant's documents
    fn routing_key(&self, tenant_id: &str) -> String;
}
