//! HTTP clients for the upstream device services

pub mod deployments;
pub mod deviceauth;
pub mod inventory;

pub use deployments::{DeploymentsClient, HttpDeploymentsClient};
pub use deviceauth::{DeviceAuthClient, DeviceAuthDevice, HttpDeviceAuthClient};
pub use inventory::{HttpInventoryClient, InventoryClient};

use std::time::Duration;

use thiserror::Error;

/// Default per-request timeout towards upstream services
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from upstream clients; transport failures and 5xx responses are
/// retriable by the next reindex event, never in-process.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to submit request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request failed with status {0}")]
    Status(u16),
}

/// Join a base URL with a path, collapsing duplicate slashes
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
