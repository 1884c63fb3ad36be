//! Inventory service client

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{join_url, ClientError, DEFAULT_TIMEOUT};
use crate::models::InvDevice;

const URL_DEVICES: &str = "/api/internal/v1/inventory/tenants/:tid/devices";
const MAX_DEVICE_IDS: usize = 200;

/// Read access to inventory device state
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Get devices by IDs; unknown devices are simply absent from the
    /// result.
    async fn get_devices(
        &self,
        tenant_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<InvDevice>, ClientError>;
}

pub struct HttpInventoryClient {
    client: reqwest::Client,
    url_base: String,
}

impl HttpInventoryClient {
    pub fn new(url_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .build()
                .expect("default reqwest client"),
            url_base: url_base.into(),
        }
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn get_devices(
        &self,
        tenant_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<InvDevice>, ClientError> {
        let url = join_url(&self.url_base, URL_DEVICES).replace(":tid", tenant_id);

        let mut devices = Vec::with_capacity(device_ids.len());
        for chunk in device_ids.chunks(MAX_DEVICE_IDS) {
            let mut query: Vec<(&str, String)> = vec![
                ("page", "1".to_string()),
                ("per_page", chunk.len().to_string()),
            ];
            for id in chunk {
                query.push(("id", id.clone()));
            }

            let rsp = self.client.get(&url).query(&query).send().await?;
            match rsp.status() {
                StatusCode::NOT_FOUND => continue,
                status if status.is_success() => {
                    let batch: Vec<InvDevice> = rsp.json().await?;
                    devices.extend(batch);
                }
                status => return Err(ClientError::Status(status.as_u16())),
            }
        }
        Ok(devices)
    }
}
