//! OpenSearch-compatible document store over its REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::template::devices_index_template;
use super::{BulkItem, DocumentStore, StoreError};
use crate::config::Config;
use crate::models::{Device, DeviceMeta};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

pub struct OpenSearchStore {
    client: reqwest::Client,
    base_url: String,
    index_name: String,
    index_shards: u32,
    index_replicas: u32,
}

impl OpenSearchStore {
    pub fn new(cfg: &Config) -> Result<Self, StoreError> {
        let base_url = cfg
            .search_addresses
            .first()
            .map(|addr| addr.trim_end_matches('/').to_string())
            .unwrap_or_default();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            index_name: cfg.devices_index_name.clone(),
            index_shards: cfg.devices_index_shards,
            index_replicas: cfg.devices_index_replicas,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn expect_json(&self, rsp: reqwest::Response) -> Result<Value, StoreError> {
        let status = rsp.status();
        if !status.is_success() {
            let message = rsp.text().await.unwrap_or_default();
            return Err(StoreError::Response {
                status: status.as_u16(),
                message,
            });
        }
        Ok(rsp.json().await?)
    }

    async fn put_index_template(&self) -> Result<(), StoreError> {
        tracing::info!(index = %self.index_name, "put the index template");
        let template = devices_index_template(
            &self.index_name,
            self.index_shards,
            self.index_replicas,
        );
        let rsp = self
            .client
            .put(self.url(&format!("_index_template/{}", self.index_name)))
            .json(&template)
            .send()
            .await?;
        self.expect_json(rsp).await?;
        Ok(())
    }

    async fn create_index_if_missing(&self) -> Result<(), StoreError> {
        tracing::info!(index = %self.index_name, "verify if the index exists");
        let rsp = self
            .client
            .head(self.url(&self.index_name))
            .send()
            .await?;
        match rsp.status() {
            StatusCode::NOT_FOUND => {
                tracing::info!(index = %self.index_name, "create the index");
                let rsp = self
                    .client
                    .put(self.url(&self.index_name))
                    .json(&json!({}))
                    .send()
                    .await?;
                self.expect_json(rsp).await?;
                Ok(())
            }
            status if status.is_success() => Ok(()),
            status => Err(StoreError::Response {
                status: status.as_u16(),
                message: "failed to verify the index".to_string(),
            }),
        }
    }
}

#[async_trait]
impl DocumentStore for OpenSearchStore {
    async fn bulk(&self, items: &[BulkItem]) -> Result<Value, StoreError> {
        let mut body = String::new();
        for item in items {
            body.push_str(&item.to_ndjson()?);
        }
        tracing::debug!(request = %body, "bulk request");

        let rsp = self
            .client
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        self.expect_json(rsp).await
    }

    async fn search(&self, tenant_id: &str, body: &Value) -> Result<Value, StoreError> {
        tracing::debug!(query = %body, "search query");

        let index = self.devices_index(tenant_id);
        let mut request = self
            .client
            .post(self.url(&format!("{index}/_search")))
            .query(&[("track_total_hits", "true")])
            .json(body);
        let routing = self.routing_key(tenant_id);
        if !routing.is_empty() {
            request = request.query(&[("routing", routing.as_str())]);
        }
        let rsp = request.send().await?;
        self.expect_json(rsp).await
    }

    async fn get_devices(
        &self,
        tenant_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<Device>, StoreError> {
        let index = self.devices_index(tenant_id);
        let routing = self.routing_key(tenant_id);
        let docs: Vec<Value> = device_ids
            .iter()
            .map(|id| {
                json!({
                    "_id": id,
                    "_index": index,
                    "routing": routing,
                })
            })
            .collect();

        let rsp = self
            .client
            .post(self.url("_mget"))
            .json(&json!({ "docs": docs }))
            .send()
            .await?;
        let body = self.expect_json(rsp).await?;

        let docs = body
            .get("docs")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Parse("can't process mget docs".to_string()))?;

        let mut devices = Vec::new();
        for doc in docs {
            if doc.get("found").and_then(Value::as_bool) == Some(false) {
                continue;
            }
            if let Some(source) = doc.get("_source").and_then(Value::as_object) {
                let mut device = Device::from_source(source)?;
                if let (Some(seq_no), Some(primary_term)) = (
                    doc.get("_seq_no").and_then(Value::as_i64),
                    doc.get("_primary_term").and_then(Value::as_i64),
                ) {
                    device = device.with_meta(DeviceMeta {
                        seq_no,
                        primary_term,
                    });
                }
                devices.push(device);
                continue;
            }
            // a missing index before the first write is not an error
            let error_type = doc
                .pointer("/error/type")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if error_type != "index_not_found_exception" {
                return Err(StoreError::Parse(format!(
                    "unexpected mget doc error {error_type}"
                )));
            }
        }
        Ok(devices)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        self.put_index_template().await?;
        self.create_index_if_missing().await
    }

    async fn get_index_mapping(&self, tenant_id: &str) -> Result<Value, StoreError> {
        let index = self.devices_index(tenant_id);
        let rsp = self.client.get(self.url(&index)).send().await?;
        let body = self.expect_json(rsp).await?;
        body.get(&index)
            .cloned()
            .ok_or_else(|| StoreError::Parse("can't parse index definition response".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let rsp = self.client.get(self.url("_cluster/health")).send().await?;
        self.expect_json(rsp).await?;
        Ok(())
    }

    fn devices_index(&self, _tenant_id: &str) -> String {
        self.index_name.clone()
    }

    fn routing_key(&self, tenant_id: &str) -> String {
        tenant_id.to_string()
    }
}
