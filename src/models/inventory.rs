//! Inventory service wire model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_scope() -> String {
    "inventory".to_string()
}

/// A device attribute as reported by (and to) the inventory API.
/// Attributes without an explicit scope default to the inventory scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvDeviceAttribute {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: Value,
    #[serde(default = "default_scope")]
    pub scope: String,
}

/// Inventory representation of a device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvDevice {
    pub id: String,
    #[serde(default)]
    pub attributes: Vec<InvDeviceAttribute>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_ts: Option<DateTime<Utc>>,
}
