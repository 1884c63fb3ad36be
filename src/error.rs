use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::clients::ClientError;
use crate::mapping::MappingError;
use crate::store::StoreError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Request validation errors
    #[error("{0}")]
    Validation(String),

    /// Missing or empty tenant identity
    #[error("tenant claim not present in JWT")]
    Identity,

    /// Reindex requested for a service outside the known set
    #[error("unknown service name")]
    UnknownService,

    /// Reindex input channel is full
    #[error("reindex input channel is full")]
    ReindexChannelFull,

    /// Document store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Attribute mapping errors
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Upstream client errors
    #[error("upstream error: {0}")]
    Client(#[from] ClientError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal server errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Identity => StatusCode::UNAUTHORIZED,
            AppError::UnknownService => StatusCode::BAD_REQUEST,
            AppError::ReindexChannelFull => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Mapping(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Client(_) => StatusCode::BAD_GATEWAY,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert AppError to an HTTP response with the error rendered as JSON
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        tracing::error!(
            status_code = status.as_u16(),
            message = %message,
            "request error"
        );

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
