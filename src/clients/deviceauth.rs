//! Device authentication service client

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{join_url, ClientError, DEFAULT_TIMEOUT};

const URL_DEVICES: &str = "/api/internal/v1/devauth/tenants/:tid/devices";
const MAX_DEVICE_IDS: usize = 200;

/// A device as known to device authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAuthDevice {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "identity_data", default)]
    pub id_data: HashMap<String, Value>,
}

impl DeviceAuthDevice {
    /// Identity data pairs rendered as strings for indexing
    pub fn id_data_strings(&self) -> impl Iterator<Item = (&str, String)> {
        self.id_data.iter().map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.as_str(), rendered)
        })
    }
}

/// Read access to device authentication state
#[async_trait]
pub trait DeviceAuthClient: Send + Sync {
    /// Get devices by IDs using the search endpoint
    async fn get_devices(
        &self,
        tenant_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<DeviceAuthDevice>, ClientError>;
}

pub struct HttpDeviceAuthClient {
    client: reqwest::Client,
    url_base: String,
}

impl HttpDeviceAuthClient {
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
impl DeviceAuthClient for HttpDeviceAuthClient {
    async fn get_devices(
        &self,
        tenant_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<DeviceAuthDevice>, ClientError> {
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
                    let batch: Vec<DeviceAuthDevice> = rsp.json().await?;
                    devices.extend(batch);
                }
                status => return Err(ClientError::Status(status.as_u16())),
            }
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_device() {
        let body = r#"{
            "id": "dev-1",
            "status": "accepted",
            "identity_data": {"mac": "aa:bb:cc", "serial_no": "0001"}
        }"#;
        let dev: DeviceAuthDevice = serde_json::from_str(body).unwrap();
        assert_eq!(dev.status, "accepted");
        assert_eq!(dev.id_data.len(), 2);

        let rendered: HashMap<&str, String> = dev.id_data_strings().collect();
        assert_eq!(rendered["mac"], "aa:bb:cc");
    }

    #[test]
    fn test_id_data_non_string_values_rendered() {
        let dev = DeviceAuthDevice {
            id: "dev-1".to_string(),
            status: "accepted".to_string(),
            id_data: HashMap::from([("revision".to_string(), json!(7))]),
        };
        let rendered: HashMap<&str, String> = dev.id_data_strings().collect();
        assert_eq!(rendered["revision"], "7");
    }
}
