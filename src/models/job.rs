//! Reindex jobs delivered through the stream

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Services whose state contributes to a device document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum KnownService {
    Inventory,
    Deviceauth,
    Deployments,
}

/// Job actions; only indexing exists today, deletes are derived from
/// upstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    #[default]
    Index,
}

/// A single reindex unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub action: JobAction,
    pub tenant_id: String,
    pub device_id: String,
    pub service: KnownService,
}

impl Job {
    pub fn new(tenant_id: impl Into<String>, device_id: impl Into<String>, service: KnownService) -> Self {
        Self {
            action: JobAction::Index,
            tenant_id: tenant_id.into(),
            device_id: device_id.into(),
            service,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_job() {
        let payload = r#"{"action":"index","tenant_id":"t1","device_id":"d1","service":"inventory"}"#;
        let job: Job = serde_json::from_str(payload).unwrap();
        assert_eq!(job.tenant_id, "t1");
        assert_eq!(job.device_id, "d1");
        assert_eq!(job.service, KnownService::Inventory);
        assert_eq!(job.action, JobAction::Index);
    }

    #[test]
    fn test_decode_job_unknown_service() {
        let payload = r#"{"action":"index","tenant_id":"t1","device_id":"d1","service":"ghost"}"#;
        assert!(serde_json::from_str::<Job>(payload).is_err());
    }

    #[test]
    fn test_service_from_str() {
        assert_eq!(
            "deviceauth".parse::<KnownService>().unwrap(),
            KnownService::Deviceauth
        );
        assert!("ghost".parse::<KnownService>().is_err());
    }
}
