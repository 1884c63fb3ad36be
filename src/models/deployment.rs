//! Deployments service wire model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device deployment as returned by the deployments API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDeployment {
    pub id: String,
    pub device: Option<DeploymentDevice>,
}

/// Device-specific part of a deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentDevice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted: Option<DateTime<Utc>>,
    pub status: String,
    pub device_id: String,
    pub deployment_id: String,
    #[serde(default)]
    pub id: String,
    #[serde(rename = "log", default)]
    pub is_log_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substate: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub attempts: u32,
}

impl DeviceDeployment {
    /// Deployment status of the device, if the device part is present
    pub fn device_status(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.status.as_str())
    }
}
