//! Row shapes mapping directly to the tables in `migrations/0001_init.sql`,
//! mirroring `cyxcloud-metadata::models`'s plain `FromRow` convention.
//!
//! `vault-core` types carry protocol/domain semantics (`Amount`, `Currency`,
//! typed enums); this module's rows are the flat, SQL-native shape sqlx binds
//! against, with `From`/`TryFrom` conversions to bridge the two.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;
use vault_core::{
    Amount, Authorization, AuthorizationStatus, Currency, ProtocolTag, VaultError,
};

#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub protocol: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub scope: Value,
    pub amount_limit_minor: Option<i64>,
    pub currency: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub raw_payload: Value,
    pub delegated_token_id: Option<String>,
    pub verification_status: String,
    pub verification_reason: Option<String>,
    pub verification_details: Value,
    pub verified_at: Option<DateTime<Utc>>,
    pub retention_days: i32,
    pub soft_delete_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AuthorizationRow {
    pub fn into_domain(self) -> Result<Authorization, VaultError> {
        Ok(Authorization {
            id: self.id,
            tenant_id: self.tenant_id,
            protocol: ProtocolTag::parse(&self.protocol)?,
            issuer: self.issuer,
            subject: self.subject,
            scope: self.scope,
            amount_limit: self
                .amount_limit_minor
                .map(Amount::from_minor_units)
                .transpose()?,
            currency: self.currency.as_deref().map(Currency::parse).transpose()?,
            expires_at: self.expires_at,
            status: status_from_str(&self.status)?,
            raw_payload: self.raw_payload,
            verification_status: self.verification_status,
            verification_reason: self.verification_reason,
            verification_details: self.verification_details,
            verified_at: self.verified_at,
            retention_days: self.retention_days,
            soft_delete_at: self.soft_delete_at,
            created_by: self.created_by,
            revoked_at: self.revoked_at,
            revoked_reason: self.revoked_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn status_from_str(s: &str) -> Result<AuthorizationStatus, VaultError> {
    match s {
        "VALID" => Ok(AuthorizationStatus::Valid),
        "ACTIVE" => Ok(AuthorizationStatus::Active),
        "EXPIRED" => Ok(AuthorizationStatus::Expired),
        "REVOKED" => Ok(AuthorizationStatus::Revoked),
        "DELETED" => Ok(AuthorizationStatus::Deleted),
        other => Err(VaultError::InvalidStatus(other.to_string())),
    }
}

/// Fields accepted when inserting a new authorization row. Separate from
/// `AuthorizationRow` because `id`/`created_at`/`updated_at` are server-
/// assigned (SPEC_FULL §3).
pub struct NewAuthorization {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub protocol: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub scope: Value,
    pub amount_limit_minor: Option<i64>,
    pub currency: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub status: String,
    pub raw_payload: Value,
    pub delegated_token_id: Option<String>,
    pub verification_status: String,
    pub verification_reason: Option<String>,
    pub verification_details: Value,
    pub verified_at: Option<DateTime<Utc>>,
    pub retention_days: i32,
    pub created_by: Option<String>,
}

impl From<&Authorization> for NewAuthorization {
    fn from(a: &Authorization) -> Self {
        Self {
            id: a.id,
            tenant_id: a.tenant_id,
            protocol: a.protocol.to_string(),
            issuer: a.issuer.clone(),
            subject: a.subject.clone(),
            scope: a.scope.clone(),
            amount_limit_minor: a.amount_limit.map(|v| v.minor_units()),
            currency: a.currency.map(|c| c.as_str().to_string()),
            expires_at: a.expires_at,
            status: a.status.to_string(),
            raw_payload: a.raw_payload.clone(),
            delegated_token_id: a
                .raw_payload
                .get("token_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            verification_status: a.verification_status.clone(),
            verification_reason: a.verification_reason.clone(),
            verification_details: a.verification_details.clone(),
            verified_at: a.verified_at,
            retention_days: a.retention_days,
            created_by: a.created_by.clone(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditEventRow {
    pub id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub kind: String,
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookSubscriptionRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub target_url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub is_active: bool,
    pub max_attempts: i32,
    pub base_delay_seconds: i32,
    pub timeout_seconds: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookSubscriptionRow {
    pub fn subscribes_to(&self, event_kind: &str) -> bool {
        self.is_active && self.events.iter().any(|e| e == event_kind)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookDeliveryRow {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub event_kind: String,
    pub payload: Value,
    pub attempts: i32,
    pub last_status_code: Option<i32>,
    pub last_response_body: Option<String>,
    pub first_failed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InboundEventRow {
    pub event_id: String,
    pub kind: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Search filter for `Database::search_authorizations`, mirroring the
/// filter surface enumerated in `spec.md` §4.5.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationFilter {
    pub protocol: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub status: Option<String>,
    pub expires_before: Option<DateTime<Utc>>,
    pub expires_after: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub min_amount_minor: Option<i64>,
    pub max_amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub scope_merchant: Option<String>,
    pub scope_category: Option<String>,
    pub scope_item: Option<String>,
    pub include_soft_deleted: bool,
    pub limit: i64,
    pub offset: i64,
    pub sort_by: SortField,
    pub sort_desc: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    ExpiresAt,
    UpdatedAt,
}

impl SortField {
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::ExpiresAt => "expires_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

pub struct SearchPage<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
