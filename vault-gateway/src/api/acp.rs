//! Inbound webhook receipt endpoint (C9), per `spec.md` §4.9.
//!
//! Reads the raw request body so the HMAC check runs over the exact
//! bytes the sender signed, before any JSON deserialization happens —
//! deserializing first and re-serializing to verify would check a
//! different (re-encoded) byte string than what was actually signed.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use crate::error::{GatewayError, Result};
use crate::inbound::{InboundEvent, InboundOutcome};
use crate::state::AppState;

const SIGNATURE_HEADER: &str = "x-acp-signature";

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(receive))
}

async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::Unauthorized)?;

    if !state.inbound().verify_signature(&body, signature) {
        return Err(GatewayError::Unauthorized);
    }

    let event: InboundEvent =
        serde_json::from_slice(&body).map_err(|e| GatewayError::Validation(e.to_string()))?;

    let outcome = state.inbound().process(event).await?;

    let status = match outcome {
        InboundOutcome::Processed => json!({ "status": "processed" }),
        InboundOutcome::AlreadyProcessed => json!({ "status": "already_processed" }),
    };

    Ok((StatusCode::OK, Json(status)))
}
