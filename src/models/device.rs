//! Indexed device document

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::attrs::{
    maybe_parse_attr, redot, AttrValue, AttributeError, InventoryAttribute, Scope,
};
use super::inventory::InvDevice;
use super::{
    ATTR_NAME_GROUP, ATTR_NAME_STATUS, FIELD_CREATED_AT, FIELD_GROUP_NAME, FIELD_ID, FIELD_NAME,
    FIELD_STATUS, FIELD_TENANT_ID, FIELD_UPDATED_AT,
};

pub const STATUS_ACCEPTED: &str = "accepted";
pub const STATUS_PENDING: &str = "pending";

/// Document-store concurrency token, retained for optimistic writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMeta {
    pub seq_no: i64,
    pub primary_term: i64,
}

/// A device as stored in the search index. Identity is
/// `(tenant_id, device_id)`; attributes are grouped by scope and flattened
/// to encoded fields on serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    pub id: String,
    pub tenant_id: String,
    pub name: Option<String>,
    pub group_name: Option<String>,
    pub status: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub attributes: Vec<InventoryAttribute>,
    pub meta: Option<DeviceMeta>,
}

impl Device {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, meta: DeviceMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Build a device from its inventory representation, promoting the
    /// special attributes to top-level fields.
    pub fn from_inventory(tenant_id: &str, invdev: &InvDevice) -> Result<Self, AttributeError> {
        let mut dev = Device::new(invdev.id.clone(), tenant_id);
        for invattr in &invdev.attributes {
            let scope: Scope = invattr
                .scope
                .parse()
                .map_err(|_| AttributeError::UnknownScope(invattr.scope.clone()))?;
            let value = AttrValue::from_json(&invattr.value)?;
            dev.append_attr(InventoryAttribute::new(scope, invattr.name.clone(), value));
        }
        Ok(dev)
    }

    /// Parse a document-store `_source` map back into a device
    pub fn from_source(source: &Map<String, Value>) -> Result<Self, AttributeError> {
        let id = source
            .get(FIELD_ID)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let tenant_id = source
            .get(FIELD_TENANT_ID)
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mut dev = Device::new(id, tenant_id);

        dev.name = source
            .get(FIELD_NAME)
            .and_then(Value::as_str)
            .map(str::to_string);
        dev.created_at = source
            .get(FIELD_CREATED_AT)
            .and_then(Value::as_str)
            .and_then(parse_rfc3339);
        dev.updated_at = source
            .get(FIELD_UPDATED_AT)
            .and_then(Value::as_str)
            .and_then(parse_rfc3339);

        for (field, raw) in source {
            if let Some((scope, name)) = maybe_parse_attr(field) {
                let value = AttrValue::from_json(raw)?;
                dev.append_attr(InventoryAttribute::new(scope, redot(&name), value));
            }
        }
        Ok(dev)
    }

    /// Append an attribute to its scope group; `identity/status` and
    /// `system/group` double as top-level fields.
    pub fn append_attr(&mut self, attr: InventoryAttribute) {
        self.handle_special_attr(&attr);
        self.attributes.push(attr);
    }

    fn handle_special_attr(&mut self, attr: &InventoryAttribute) {
        if attr.scope == Scope::Identity && attr.name == ATTR_NAME_STATUS {
            self.status = attr.value.first_string().map(str::to_string);
        }
        if attr.scope == Scope::System && attr.name == ATTR_NAME_GROUP {
            self.group_name = attr.value.first_string().map(str::to_string);
        }
    }

    pub fn attributes_in_scope(&self, scope: Scope) -> impl Iterator<Item = &InventoryAttribute> {
        self.attributes.iter().filter(move |a| a.scope == scope)
    }

    /// Flatten to the indexed document shape: fixed fields plus one encoded
    /// field per attribute.
    pub fn to_doc(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(FIELD_ID.to_string(), Value::String(self.id.clone()));
        doc.insert(
            FIELD_TENANT_ID.to_string(),
            Value::String(self.tenant_id.clone()),
        );
        if let Some(name) = &self.name {
            doc.insert(FIELD_NAME.to_string(), Value::String(name.clone()));
        }
        if let Some(group_name) = &self.group_name {
            doc.insert(
                FIELD_GROUP_NAME.to_string(),
                Value::String(group_name.clone()),
            );
        }
        if let Some(status) = &self.status {
            doc.insert(FIELD_STATUS.to_string(), Value::String(status.clone()));
        }
        if let Some(created_at) = &self.created_at {
            doc.insert(
                FIELD_CREATED_AT.to_string(),
                Value::String(created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        if let Some(updated_at) = &self.updated_at {
            doc.insert(
                FIELD_UPDATED_AT.to_string(),
                Value::String(updated_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        for attr in &self.attributes {
            let (field, value) = attr.to_field();
            doc.insert(field, value);
        }
        Value::Object(doc)
    }
}

fn parse_rfc3339(val: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(val)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::inventory::InvDeviceAttribute;
    use serde_json::json;

    fn inv_device() -> InvDevice {
        InvDevice {
            id: "dev-1".to_string(),
            attributes: vec![
                InvDeviceAttribute {
                    name: "mac".to_string(),
                    value: json!("00:11:22:33:44"),
                    scope: "identity".to_string(),
                    description: None,
                },
                InvDeviceAttribute {
                    name: "device_type".to_string(),
                    value: json!("dm1"),
                    scope: "inventory".to_string(),
                    description: None,
                },
                InvDeviceAttribute {
                    name: "mem_total_kB".to_string(),
                    value: json!(1020664.0),
                    scope: "inventory".to_string(),
                    description: None,
                },
                InvDeviceAttribute {
                    name: "group".to_string(),
                    value: json!("group-01"),
                    scope: "system".to_string(),
                    description: None,
                },
            ],
            updated_ts: None,
        }
    }

    #[test]
    fn test_from_inventory() {
        let dev = Device::from_inventory("tenant-1", &inv_device()).unwrap();
        assert_eq!(dev.id, "dev-1");
        assert_eq!(dev.tenant_id, "tenant-1");
        assert_eq!(dev.attributes.len(), 4);
        // system/group promoted to the top-level field
        assert_eq!(dev.group_name.as_deref(), Some("group-01"));
    }

    #[test]
    fn test_status_promotion() {
        let mut dev = Device::new("dev-1", "tenant-1");
        dev.append_attr(InventoryAttribute::new(
            Scope::Identity,
            ATTR_NAME_STATUS,
            AttrValue::Str(STATUS_ACCEPTED.to_string()),
        ));
        assert_eq!(dev.status.as_deref(), Some(STATUS_ACCEPTED));
    }

    #[test]
    fn test_to_doc() {
        let mut dev = Device::from_inventory("tenant-1", &inv_device()).unwrap();
        dev.append_attr(InventoryAttribute::new(
            Scope::Identity,
            ATTR_NAME_STATUS,
            AttrValue::Str(STATUS_PENDING.to_string()),
        ));
        let doc = dev.to_doc();

        assert_eq!(doc["id"], json!("dev-1"));
        assert_eq!(doc["tenant_id"], json!("tenant-1"));
        assert_eq!(doc["status"], json!("pending"));
        assert_eq!(doc["group_name"], json!("group-01"));
        assert_eq!(doc["identity_mac_str"], json!(["00:11:22:33:44"]));
        assert_eq!(doc["inventory_device_type_str"], json!(["dm1"]));
        assert_eq!(doc["inventory_mem_total_kB_num"], json!([1020664.0]));
        assert_eq!(doc["system_group_str"], json!(["group-01"]));
    }

    #[test]
    fn test_source_round_trip() {
        let mut dev = Device::from_inventory("tenant-1", &inv_device()).unwrap();
        dev.updated_at = Some(Utc::now());
        let doc = dev.to_doc();

        let source = doc.as_object().unwrap();
        let parsed = Device::from_source(source).unwrap();

        assert_eq!(parsed.id, dev.id);
        assert_eq!(parsed.tenant_id, dev.tenant_id);
        assert_eq!(parsed.group_name, dev.group_name);
        assert_eq!(parsed.attributes.len(), dev.attributes.len());
        let mac = parsed
            .attributes
            .iter()
            .find(|a| a.name == "mac" && a.scope == Scope::Identity)
            .unwrap();
        // single values come back as 1-element arrays
        assert_eq!(
            mac.value,
            AttrValue::Strs(vec!["00:11:22:33:44".to_string()])
        );
    }

    #[test]
    fn test_from_source_dotted_name_restored() {
        let mut dev = Device::new("dev-1", "tenant-1");
        dev.append_attr(InventoryAttribute::new(
            Scope::Inventory,
            "rootfs-image.version",
            AttrValue::Str("system-M1".to_string()),
        ));
        let doc = dev.to_doc();
        let parsed = Device::from_source(doc.as_object().unwrap()).unwrap();
        assert!(parsed
            .attributes
            .iter()
            .any(|a| a.name == "rootfs-image.version"));
    }

    #[test]
    fn test_from_inventory_rejects_unknown_scope() {
        let invdev = InvDevice {
            id: "dev-1".to_string(),
            attributes: vec![InvDeviceAttribute {
                name: "x".to_string(),
                value: json!("y"),
                scope: "garbage".to_string(),
                description: None,
            }],
            updated_ts: None,
        };
        assert!(matches!(
            Device::from_inventory("t", &invdev),
            Err(AttributeError::UnknownScope(_))
        ));
    }
}
