//! Request identity: tenant claim from the JWT and RBAC device-group
//! scope from headers.
//!
//! The token signature is validated at the gateway; this layer only reads
//! the claims.

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::error::AppError;

/// RBAC scope header carrying the caller's device groups
pub const RBAC_DEVICE_GROUPS_HEADER: &str = "x-men-rbac-device-groups";

const TENANT_CLAIM: &str = "mender.tenant";

/// Caller identity extracted from the JWT claims
#[derive(Debug, Clone)]
pub struct Identity {
    pub tenant: String,
    pub subject: Option<String>,
}

/// Axum middleware guarding the management API: requests without a tenant
/// claim are rejected with 401.
pub async fn identity_middleware(mut req: Request<Body>, next: Next) -> Response {
    match identity_from_headers(req.headers()) {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => AppError::Identity.into_response(),
    }
}

pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let auth = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    identity_from_jwt(token)
}

/// Decode the JWT payload and read the tenant claim
pub fn identity_from_jwt(token: &str) -> Option<Identity> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let payload = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&payload).ok()?;

    let tenant = claims.get(TENANT_CLAIM).and_then(Value::as_str)?;
    if tenant.is_empty() {
        return None;
    }
    Some(Identity {
        tenant: tenant.to_string(),
        subject: claims
            .get("sub")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Device groups from the RBAC scope header, if present
pub fn rbac_device_groups(headers: &HeaderMap) -> Vec<String> {
    headers
        .get(RBAC_DEVICE_GROUPS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|group| !group.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
