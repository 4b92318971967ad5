//! Crate-wide gateway error type, translating the taxonomy of `spec.md`
//! §7 into HTTP statuses without leaking internals.
//!
//! Grounded on `cyxcloud-gateway::s3_api::S3Error`'s `IntoResponse`
//! pattern (per-variant status + body, never the `Display` of the
//! underlying cause).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl From<vault_store::StoreError> for GatewayError {
    fn from(e: vault_store::StoreError) -> Self {
        match e {
            vault_store::StoreError::NotFound(msg) => GatewayError::NotFound(msg),
            vault_store::StoreError::LimitTooLarge(n) => {
                GatewayError::Validation(format!("limit {n} exceeds maximum of 1000"))
            }
            other => GatewayError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<vault_core::VaultError> for GatewayError {
    fn from(e: vault_core::VaultError) -> Self {
        GatewayError::Validation(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            GatewayError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            GatewayError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "authentication required".to_string())
            }
            GatewayError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            GatewayError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            GatewayError::Upstream(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            GatewayError::RateLimited => {
                (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded".to_string())
            }
            GatewayError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
