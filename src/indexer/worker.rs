//! Reindex worker: joins upstream device representations and writes the
//! consolidated documents in one bulk request per tenant.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::pipeline::JobProcessor;
use crate::clients::{DeviceAuthClient, DeploymentsClient, InventoryClient};
use crate::mapping::Mapper;
use crate::models::{
    AttrValue, Device, DeviceMeta, InventoryAttribute, Job, Scope, ScopedName,
    ATTR_NAME_LATEST_DEPLOYMENT_STATUS, ATTR_NAME_STATUS,
};
use crate::store::{BulkAction, BulkActionDesc, BulkItem, BulkKind, DocumentStore};

pub struct ReindexWorker {
    store: Arc<dyn DocumentStore>,
    mapper: Arc<Mapper>,
    deviceauth: Arc<dyn DeviceAuthClient>,
    inventory: Arc<dyn InventoryClient>,
    deployments: Arc<dyn DeploymentsClient>,
}

/// Collapse jobs into per-tenant device sets; a device requested by
/// several services is indexed once.
pub fn group_jobs(jobs: &[Job]) -> BTreeMap<String, BTreeSet<String>> {
    let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for job in jobs {
        grouped
            .entry(job.tenant_id.clone())
            .or_default()
            .insert(job.device_id.clone());
    }
    grouped
}

impl ReindexWorker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        mapper: Arc<Mapper>,
        deviceauth: Arc<dyn DeviceAuthClient>,
        inventory: Arc<dyn InventoryClient>,
        deployments: Arc<dyn DeploymentsClient>,
    ) -> Self {
        Self {
            store,
            mapper,
            deviceauth,
            inventory,
            deployments,
        }
    }

    async fn process_tenant(&self, tenant_id: &str, device_ids: &[String]) {
        let auth_devices = match self.deviceauth.get_devices(tenant_id, device_ids).await {
            Ok(devices) => devices,
            Err(err) => {
                tracing::error!(
                    tenant_id,
                    error = %err,
                    "failed to get devices from deviceauth"
                );
                return;
            }
        };
        let inv_devices = match self.inventory.get_devices(tenant_id, device_ids).await {
            Ok(devices) => devices,
            Err(err) => {
                tracing::error!(
                    tenant_id,
                    error = %err,
                    "failed to get devices from inventory"
                );
                return;
            }
        };
        // current documents provide the concurrency tokens for optimistic
        // writes and deletes
        let metas: HashMap<String, DeviceMeta> =
            match self.store.get_devices(tenant_id, device_ids).await {
                Ok(devices) => devices
                    .into_iter()
                    .filter_map(|d| d.meta.map(|meta| (d.id, meta)))
                    .collect(),
                Err(err) => {
                    tracing::warn!(
                        tenant_id,
                        error = %err,
                        "failed to get current documents, writing without concurrency tokens"
                    );
                    HashMap::new()
                }
            };

        let index = self.store.devices_index(tenant_id);
        let routing = self.store.routing_key(tenant_id);
        let mut items: Vec<BulkItem> = Vec::with_capacity(device_ids.len());

        for device_id in device_ids {
            let auth = auth_devices.iter().find(|d| d.id == *device_id);
            let inv = inv_devices.iter().find(|d| d.id == *device_id);

            let (auth, inv) = match (auth, inv) {
                (Some(auth), Some(inv)) => (auth, inv),
                // both sources must agree for a device to stay indexed
                _ => {
                    let meta = metas.get(device_id);
                    items.push(BulkItem {
                        action: BulkAction {
                            kind: BulkKind::Delete,
                            desc: BulkActionDesc {
                                id: device_id.clone(),
                                index: index.clone(),
                                routing: routing.clone(),
                                if_seq_no: meta.map(|m| m.seq_no),
                                if_primary_term: meta.map(|m| m.primary_term),
                            },
                        },
                        doc: None,
                    });
                    continue;
                }
            };

            let mut device = match Device::from_inventory(tenant_id, inv) {
                Ok(device) => device,
                Err(err) => {
                    tracing::error!(
                        tenant_id,
                        device_id,
                        error = %err,
                        "failed to convert the inventory device"
                    );
                    continue;
                }
            };

            if let Err(err) = self.map_device_attributes(tenant_id, &mut device).await {
                tracing::error!(
                    tenant_id,
                    device_id,
                    error = %err,
                    "failed to map inventory attributes"
                );
                continue;
            }

            device.append_attr(InventoryAttribute::new(
                Scope::Identity,
                ATTR_NAME_STATUS,
                AttrValue::Str(auth.status.clone()),
            ));
            for (name, value) in auth.id_data_strings() {
                device.append_attr(InventoryAttribute::new(
                    Scope::Identity,
                    name,
                    AttrValue::Str(value),
                ));
            }

            // the deployment status is a first-class field; a partial
            // document would regress state, so a lookup failure skips the
            // device until the next reindex
            match self
                .deployments
                .get_latest_finished_deployment(tenant_id, device_id)
                .await
            {
                Ok(Some(deployment)) => {
                    if let Some(status) = deployment.device_status() {
                        device.append_attr(InventoryAttribute::new(
                            Scope::System,
                            ATTR_NAME_LATEST_DEPLOYMENT_STATUS,
                            AttrValue::Str(status.to_string()),
                        ));
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        tenant_id,
                        device_id,
                        error = %err,
                        "failed to get the latest deployment, skipping the device"
                    );
                    continue;
                }
            }

            let now = Utc::now();
            device.updated_at = Some(now);
            let meta = metas.get(device_id);
            if meta.is_none() {
                device.created_at = Some(now);
            }

            items.push(BulkItem {
                action: BulkAction {
                    kind: BulkKind::Index,
                    desc: BulkActionDesc {
                        id: device_id.clone(),
                        index: index.clone(),
                        routing: routing.clone(),
                        if_seq_no: meta.map(|m| m.seq_no),
                        if_primary_term: meta.map(|m| m.primary_term),
                    },
                },
                doc: Some(device.to_doc()),
            });
        }

        if items.is_empty() {
            return;
        }
        match self.store.bulk(&items).await {
            Ok(response) => handle_bulk_response(tenant_id, &response),
            Err(err) => {
                tracing::error!(
                    tenant_id,
                    error = %err,
                    "failed to bulk index the devices"
                );
            }
        }
    }

    /// Replace mapped inventory attribute names with their slots,
    /// extending the mapping for names seen for the first time.
    async fn map_device_attributes(
        &self,
        tenant_id: &str,
        device: &mut Device,
    ) -> Result<(), crate::mapping::MappingError> {
        let scoped: Vec<ScopedName> = device
            .attributes_in_scope(Scope::Inventory)
            .map(|a| ScopedName::new(a.scope, a.name.clone()))
            .collect();
        if scoped.is_empty() {
            return Ok(());
        }
        let mapped = self
            .mapper
            .map_inventory_attributes(tenant_id, &scoped, true)
            .await?;
        let mut mapped = mapped.into_iter();
        for attr in device
            .attributes
            .iter_mut()
            .filter(|a| a.scope == Scope::Inventory)
        {
            if let Some(scoped) = mapped.next() {
                attr.name = scoped.name;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobProcessor for ReindexWorker {
    async fn process_jobs(&self, jobs: &[Job]) {
        tracing::debug!(jobs = jobs.len(), "processing jobs");
        for (tenant_id, device_ids) in group_jobs(jobs) {
            let device_ids: Vec<String> = device_ids.into_iter().collect();
            self.process_tenant(&tenant_id, &device_ids).await;
        }
    }
}

/// Per-item failures in a bulk response are warnings: a conflicting
/// device is picked up again by its next reindex event.
fn handle_bulk_response(tenant_id: &str, response: &Value) {
    if response.get("errors").and_then(Value::as_bool) != Some(true) {
        return;
    }
    let Some(items) = response.get("items").and_then(Value::as_array) else {
        return;
    };
    for item in items {
        let Some(action) = item.as_object().and_then(|m| m.values().next()) else {
            continue;
        };
        if let Some(error) = action.get("error") {
            tracing::warn!(
                tenant_id,
                device_id = action.get("_id").and_then(serde_json::Value::as_str).unwrap_or_default(),
                index = action.get("_index").and_then(serde_json::Value::as_str).unwrap_or_default(),
                error = %error,
                "bulk update failed for device"
            );
        }
    }
}
