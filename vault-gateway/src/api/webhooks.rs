//! Webhook subscription CRUD and delivery history handlers, per
//! `spec.md` §6 ("Webhook subscription management" supplement to the
//! named C7/C8 modules).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vault_store::WebhookSubscriptionRow;

use crate::auth::AuthContext;
use crate::error::{GatewayError, Result};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscriptions", post(create_subscription))
        .route("/subscriptions", get(list_subscriptions))
        .route("/subscriptions/:id", get(get_subscription))
        .route("/subscriptions/:id", axum::routing::patch(set_subscription_active))
        .route("/subscriptions/:id", axum::routing::delete(delete_subscription))
        .route("/deliveries", get(search_deliveries))
}

#[derive(Debug, Serialize)]
struct SubscriptionResponse {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    target_url: String,
    events: Vec<String>,
    is_active: bool,
    max_attempts: i32,
    base_delay_seconds: i32,
    timeout_seconds: i32,
}

impl From<WebhookSubscriptionRow> for SubscriptionResponse {
    fn from(row: WebhookSubscriptionRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            target_url: row.target_url,
            events: row.events,
            is_active: row.is_active,
            max_attempts: row.max_attempts,
            base_delay_seconds: row.base_delay_seconds,
            timeout_seconds: row.timeout_seconds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateSubscriptionRequest {
    tenant_id: Uuid,
    name: String,
    target_url: String,
    events: Vec<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default = "default_max_attempts")]
    max_attempts: i32,
    #[serde(default = "default_base_delay_seconds")]
    base_delay_seconds: i32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: i32,
}

fn default_max_attempts() -> i32 {
    3
}

fn default_base_delay_seconds() -> i32 {
    60
}

fn default_timeout_seconds() -> i32 {
    30
}

async fn create_subscription(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>)> {
    auth_context.check_tenant(req.tenant_id)?;

    if req.events.is_empty() {
        return Err(GatewayError::Validation(
            "events must contain at least one event kind".into(),
        ));
    }

    let row = state
        .db()
        .create_subscription(
            req.tenant_id,
            &req.name,
            &req.target_url,
            &req.events,
            req.secret.as_deref(),
            req.max_attempts,
            req.base_delay_seconds,
            req.timeout_seconds,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(row.into())))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    auth_context: AuthContext,
) -> Result<Json<Vec<SubscriptionResponse>>> {
    let rows = state.db().list_subscriptions(auth_context.tenant_id).await?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

async fn get_subscription(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>> {
    let row = state
        .db()
        .get_subscription(auth_context.tenant_id, id)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("subscription {id} not found")))?;
    Ok(Json(row.into()))
}

#[derive(Debug, Deserialize)]
struct SetActiveRequest {
    is_active: bool,
}

async fn set_subscription_active(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<SubscriptionResponse>> {
    let row = state
        .db()
        .set_subscription_active(auth_context.tenant_id, id, req.is_active)
        .await?
        .ok_or_else(|| GatewayError::NotFound(format!("subscription {id} not found")))?;
    Ok(Json(row.into()))
}

async fn delete_subscription(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let deleted = state
        .db()
        .delete_subscription(auth_context.tenant_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::NotFound(format!("subscription {id} not found")))
    }
}

#[derive(Debug, Deserialize, Default)]
struct DeliveryQuery {
    subscription_id: Option<Uuid>,
    authorization_id: Option<Uuid>,
    #[serde(default = "default_delivery_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_delivery_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
struct DeliveryResponse {
    id: Uuid,
    subscription_id: Uuid,
    authorization_id: Option<Uuid>,
    event_kind: String,
    attempts: i32,
    last_status_code: Option<i32>,
    delivered_at: Option<chrono::DateTime<chrono::Utc>>,
    next_attempt_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn search_deliveries(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Query(query): Query<DeliveryQuery>,
) -> Result<Json<Vec<DeliveryResponse>>> {
    // Authorize by confirming the subscription, if named, belongs to the
    // caller's tenant; otherwise callers can only page their own tenant's
    // deliveries via `subscription_id` (administrators may omit it).
    if let Some(subscription_id) = query.subscription_id {
        if !auth_context.is_administrator() {
            state
                .db()
                .get_subscription(auth_context.tenant_id, subscription_id)
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("subscription {subscription_id} not found")))?;
        }
    } else if !auth_context.is_administrator() {
        return Err(GatewayError::Validation(
            "subscription_id is required for non-administrator callers".into(),
        ));
    }

    let rows = state
        .db()
        .search_deliveries(
            query.subscription_id,
            query.authorization_id,
            query.limit.clamp(1, 1000),
            query.offset.max(0),
        )
        .await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| DeliveryResponse {
                id: row.id,
                subscription_id: row.subscription_id,
                authorization_id: row.authorization_id,
                event_kind: row.event_kind,
                attempts: row.attempts,
                last_status_code: row.last_status_code,
                delivered_at: row.delivered_at,
                next_attempt_at: row.next_attempt_at,
            })
            .collect(),
    ))
}
