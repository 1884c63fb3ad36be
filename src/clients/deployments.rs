//! Deployments service client

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{join_url, ClientError, DEFAULT_TIMEOUT};
use crate::models::DeviceDeployment;

const URL_DEVICE_DEPLOYMENTS: &str = "/api/internal/v1/deployments/tenants/:tid/deployments/devices";
const URL_DEVICE_DEPLOYMENTS_ID: &str =
    "/api/internal/v1/deployments/tenants/:tid/deployments/devices/:id";
// API constraint on the number of IDs per request
const MAX_DEPLOYMENT_IDS: usize = 20;

/// Read access to device deployment state
#[async_trait]
pub trait DeploymentsClient: Send + Sync {
    /// Get device deployments by IDs
    async fn get_deployments(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<DeviceDeployment>, ClientError>;

    /// The single latest finished deployment of a device, if any
    async fn get_latest_finished_deployment(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceDeployment>, ClientError>;
}

pub struct HttpDeploymentsClient {
    client: reqwest::Client,
    url_base: String,
}

impl HttpDeploymentsClient {
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
impl DeploymentsClient for HttpDeploymentsClient {
    async fn get_deployments(
        &self,
        tenant_id: &str,
        ids: &[String],
    ) -> Result<Vec<DeviceDeployment>, ClientError> {
        let url = join_url(&self.url_base, URL_DEVICE_DEPLOYMENTS).replace(":tid", tenant_id);

        let mut deployments = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_DEPLOYMENT_IDS) {
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
                    let batch: Vec<DeviceDeployment> = rsp.json().await?;
                    deployments.extend(batch);
                }
                status => return Err(ClientError::Status(status.as_u16())),
            }
        }
        Ok(deployments)
    }

    async fn get_latest_finished_deployment(
        &self,
        tenant_id: &str,
        device_id: &str,
    ) -> Result<Option<DeviceDeployment>, ClientError> {
        let url = join_url(&self.url_base, URL_DEVICE_DEPLOYMENTS_ID)
            .replace(":tid", tenant_id)
            .replace(":id", device_id);

        let rsp = self
            .client
            .get(&url)
            .query(&[("page", "1"), ("per_page", "1")])
            .send()
            .await?;
        match rsp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let deployments: Vec<DeviceDeployment> = rsp.json().await?;
                Ok(deployments.into_iter().next())
            }
            status => Err(ClientError::Status(status.as_u16())),
        }
    }
}
