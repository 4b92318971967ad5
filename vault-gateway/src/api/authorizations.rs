//! Authorization resource handlers, per `spec.md` §6.
//!
//! Grounded on `cyxcloud-gateway::auth_api`'s handler shape
//! (`routes() -> Router<AppState>`, `State(state): State<AppState>`,
//! `Result<Json<T>, GatewayError>`), with `AuthContext` substituted in
//! as a custom extractor wherever the teacher pulls a user/node id out
//! of the bearer claims.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use vault_core::{Authorization, ProtocolTag};
use vault_store::{AuthorizationFilter, SortField};

use crate::auth::AuthContext;
use crate::error::{GatewayError, Result};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/search", post(search))
        .route("/:id", get(read))
        .route("/:id", delete(revoke))
        .route("/:id/verify", post(reverify))
        .route("/:id/soft-delete", post(soft_delete))
        .route("/:id/restore", post(restore))
        .route("/:id/evidence-pack", get(evidence_pack))
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    tenant_id: Uuid,
    protocol: String,
    payload: Value,
    #[serde(default = "default_retention_days")]
    retention_days: i32,
}

fn default_retention_days() -> i32 {
    90
}

async fn create(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Authorization>)> {
    auth_context.check_tenant(req.tenant_id)?;
    let protocol = ProtocolTag::parse(&req.protocol)?;

    if protocol == ProtocolTag::DelegatedToken {
        let config = &state.config().delegated_token;
        if !config.enabled {
            return Err(GatewayError::Forbidden(
                "DelegatedToken protocol is disabled".into(),
            ));
        }
        let psp_id = req
            .payload
            .get("psp_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatewayError::Validation("payload missing psp_id".into()))?;
        if !config.issuer_allowed(psp_id) {
            return Err(GatewayError::Forbidden(format!(
                "psp_id {psp_id} is not allow-listed"
            )));
        }
    }

    let authorization = state
        .lifecycle()
        .create(
            req.tenant_id,
            protocol,
            req.payload,
            req.retention_days,
            Some(auth_context.subject),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(authorization)))
}

async fn read(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Authorization>> {
    let authorization = state.lifecycle().read(auth_context.tenant_id, id).await?;
    auth_context.check_tenant(authorization.tenant_id)?;
    Ok(Json(authorization))
}

async fn reverify(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Authorization>> {
    let authorization = state
        .lifecycle()
        .reverify(auth_context.tenant_id, id)
        .await?;
    Ok(Json(authorization))
}

#[derive(Debug, Deserialize, Default)]
struct RevokeQuery {
    reason: Option<String>,
}

async fn revoke(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    Query(query): Query<RevokeQuery>,
) -> Result<Json<Authorization>> {
    let reason = query.reason;
    let authorization = state
        .lifecycle()
        .revoke(auth_context.tenant_id, id, reason)
        .await?;
    Ok(Json(authorization))
}

/// Soft-delete, per `spec.md` §4.6 "Soft-delete" — the precursor step
/// `restore` and the retention reaper's `Purge` both act on. Not in
/// `spec.md` §6's bounding table (which folds the terminal case into
/// `DELETE`/revoke); supplemented per SPEC_FULL §6 the same way
/// `/restore` is.
async fn soft_delete(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Authorization>> {
    let authorization = state
        .lifecycle()
        .soft_delete(auth_context.tenant_id, id)
        .await?;
    Ok(Json(authorization))
}

async fn restore(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Authorization>> {
    let authorization = state
        .lifecycle()
        .restore(auth_context.tenant_id, id)
        .await?;
    Ok(Json(authorization))
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SearchRequest {
    protocol: Option<String>,
    issuer: Option<String>,
    subject: Option<String>,
    status: Option<String>,
    expires_before: Option<DateTime<Utc>>,
    expires_after: Option<DateTime<Utc>>,
    created_after: Option<DateTime<Utc>>,
    min_amount: Option<String>,
    max_amount: Option<String>,
    currency: Option<String>,
    scope_merchant: Option<String>,
    scope_category: Option<String>,
    scope_item: Option<String>,
    include_soft_deleted: bool,
    limit: i64,
    offset: i64,
    sort_by: SearchSortField,
    sort_desc: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            protocol: None,
            issuer: None,
            subject: None,
            status: None,
            expires_before: None,
            expires_after: None,
            created_after: None,
            min_amount: None,
            max_amount: None,
            currency: None,
            scope_merchant: None,
            scope_category: None,
            scope_item: None,
            include_soft_deleted: false,
            limit: 50,
            offset: 0,
            sort_by: SearchSortField::CreatedAt,
            sort_desc: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum SearchSortField {
    #[default]
    CreatedAt,
    ExpiresAt,
    UpdatedAt,
}

impl From<SearchSortField> for SortField {
    fn from(value: SearchSortField) -> Self {
        match value {
            SearchSortField::CreatedAt => SortField::CreatedAt,
            SearchSortField::ExpiresAt => SortField::ExpiresAt,
            SearchSortField::UpdatedAt => SortField::UpdatedAt,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    items: Vec<Authorization>,
    total: i64,
    limit: i64,
    offset: i64,
}

async fn search(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let min_amount_minor = req
        .min_amount
        .as_deref()
        .map(vault_core::Amount::parse)
        .transpose()?
        .map(|a| a.minor_units());
    let max_amount_minor = req
        .max_amount
        .as_deref()
        .map(vault_core::Amount::parse)
        .transpose()?
        .map(|a| a.minor_units());

    let filter = AuthorizationFilter {
        protocol: req.protocol,
        issuer: req.issuer,
        subject: req.subject,
        status: req.status,
        expires_before: req.expires_before,
        expires_after: req.expires_after,
        created_after: req.created_after,
        min_amount_minor,
        max_amount_minor,
        currency: req.currency,
        scope_merchant: req.scope_merchant,
        scope_category: req.scope_category,
        scope_item: req.scope_item,
        include_soft_deleted: req.include_soft_deleted,
        limit: req.limit,
        offset: req.offset.max(0),
        sort_by: req.sort_by.into(),
        sort_desc: req.sort_desc,
    };

    let tenant_scope = if auth_context.is_administrator() {
        None
    } else {
        Some(auth_context.tenant_id)
    };

    let page = state.lifecycle().search(tenant_scope, filter).await?;

    Ok(Json(SearchResponse {
        items: page.items,
        total: page.total,
        limit: page.limit,
        offset: page.offset,
    }))
}

#[derive(Debug, Deserialize)]
struct EvidenceQuery {
    tenant_id: Option<Uuid>,
}

async fn evidence_pack(
    State(state): State<AppState>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    Query(query): Query<EvidenceQuery>,
) -> Result<Response> {
    let tenant_id = query.tenant_id.unwrap_or(auth_context.tenant_id);
    auth_context.check_tenant(tenant_id)?;

    let (bytes, filename) = state.evidence().build(tenant_id, id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
