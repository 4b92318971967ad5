//! Lifecycle Coordinator (C6): the authorization state machine, per
//! `spec.md` §4.6.
//!
//! Grounded on
//! `original_source/app/services/mandate_service.py::MandateService`'s
//! `create_mandate` (tenant-missing → audit-then-fail; audit the
//! verification attempt before the row exists; webhook failures never
//! fail the triggering operation — logged and swallowed) generalized
//! over both protocols via `crate::dispatcher::Dispatcher`.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;
use vault_core::{
    AuditEventKind, Authorization, AuthorizationStatus, ProtocolTag, VerificationResult,
    WebhookEventKind,
};
use vault_store::{AuthorizationFilter, AuthorizationRow, Database, NewAuthorization, SearchPage};

use crate::audit::AuditLog;
use crate::dispatcher::Dispatcher;
use crate::error::{GatewayError, Result};
use crate::webhook::WebhookEngine;

pub struct LifecycleCoordinator {
    db: std::sync::Arc<Database>,
    dispatcher: std::sync::Arc<Dispatcher>,
    audit: std::sync::Arc<AuditLog>,
    webhook: std::sync::Arc<WebhookEngine>,
}

impl LifecycleCoordinator {
    pub fn new(
        db: std::sync::Arc<Database>,
        dispatcher: std::sync::Arc<Dispatcher>,
        audit: std::sync::Arc<AuditLog>,
        webhook: std::sync::Arc<WebhookEngine>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            audit,
            webhook,
        }
    }

    /// Create, per `spec.md` §4.6 "Create" steps 1-7.
    pub async fn create(
        &self,
        tenant_id: Uuid,
        protocol: ProtocolTag,
        payload: Value,
        retention_days: i32,
        created_by: Option<String>,
    ) -> Result<Authorization> {
        // Step 1: resolve tenant.
        if self.db.get_tenant(tenant_id).await?.is_none() {
            self.audit
                .log_event(
                    None,
                    AuditEventKind::TenantNotFound,
                    serde_json::json!({ "tenant_id": tenant_id }),
                )
                .await?;
            return Err(GatewayError::Validation(format!(
                "tenant {tenant_id} not found"
            )));
        }

        // Step 2: dispatch verification; audit regardless of outcome.
        let result = self.dispatcher.verify(protocol, &payload, None).await;
        self.audit
            .log_event(
                None,
                AuditEventKind::Verified,
                serde_json::json!({
                    "status": result.status_str(),
                    "reason": result.reason,
                    "details": result.details,
                }),
            )
            .await?;

        // Step 3: reject on non-valid verification.
        if !result.is_valid() {
            return Err(GatewayError::Validation(format!(
                "verification failed: {}",
                result.reason
            )));
        }

        // Step 4: map result -> row.
        let expires_at = result
            .expires_at
            .ok_or_else(|| GatewayError::Validation("verification result missing expires_at".into()))?;

        // DelegatedToken credentials are looked up later by the inbound
        // receiver using this id (spec.md §4.9 step 4); JWT-VC payloads
        // carry no such field.
        let delegated_token_id = payload
            .get("token_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let new_row = NewAuthorization {
            id: Uuid::new_v4(),
            tenant_id,
            protocol: protocol.to_string(),
            issuer: result.issuer.clone(),
            subject: result.subject.clone(),
            scope: result.scope.clone(),
            amount_limit_minor: result.amount_limit.map(|a| a.minor_units()),
            currency: result.currency.map(|c| c.as_str().to_string()),
            expires_at,
            status: AuthorizationStatus::Valid.to_string(),
            raw_payload: payload,
            delegated_token_id,
            verification_status: result.status_str().to_string(),
            verification_reason: Some(result.reason.clone()),
            verification_details: result.details.clone(),
            verified_at: Some(Utc::now()),
            retention_days,
            created_by,
        };

        // Step 5: persist.
        let row = self.db.create_authorization(new_row).await?;
        let authorization = row.into_domain()?;

        // Step 6: audit CREATED.
        self.audit
            .log_event(
                Some(authorization.id),
                AuditEventKind::Created,
                serde_json::json!({
                    "protocol": authorization.protocol.to_string(),
                    "issuer": authorization.issuer,
                    "subject": authorization.subject,
                }),
            )
            .await?;

        // Step 7: enqueue webhook, best-effort.
        if let Err(e) = self
            .webhook
            .send_event(WebhookEventKind::MandateCreated, &authorization, tenant_id, None)
            .await
        {
            tracing::warn!(error = %e, authorization_id = %authorization.id, "webhook enqueue failed on create");
        }

        Ok(authorization)
    }

    /// Re-verify, per `spec.md` §4.6 "Re-verify".
    pub async fn reverify(&self, tenant_id: Uuid, id: Uuid) -> Result<Authorization> {
        let row = self
            .db
            .get_authorization(tenant_id, id, false)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("authorization {id} not found")))?;
        let previous_status = row.status.clone();
        let protocol = ProtocolTag::parse(&row.protocol)?;

        let result: VerificationResult = self
            .dispatcher
            .verify(protocol, &row.raw_payload, None)
            .await;

        let new_status = result
            .status
            .map(|s| s.reverify_collapse())
            .unwrap_or(AuthorizationStatus::Revoked);

        let updated_row = self
            .db
            .update_verification(
                id,
                &new_status.to_string(),
                result.status_str(),
                Some(&result.reason),
                result.details.clone(),
                Utc::now(),
            )
            .await?;
        let authorization = updated_row.into_domain()?;

        self.audit
            .log_event(
                Some(id),
                AuditEventKind::Verified,
                serde_json::json!({
                    "old_status": previous_status,
                    "new_status": new_status.to_string(),
                    "verification_status": result.status_str(),
                    "reason": result.reason,
                }),
            )
            .await?;

        if new_status != AuthorizationStatus::Valid {
            if let Err(e) = self
                .webhook
                .send_event(
                    WebhookEventKind::MandateVerificationFailed,
                    &authorization,
                    tenant_id,
                    None,
                )
                .await
            {
                tracing::warn!(error = %e, authorization_id = %id, "webhook enqueue failed on reverify");
            }
        }

        Ok(authorization)
    }

    /// Revoke, unconditional on a non-soft-deleted row.
    pub async fn revoke(&self, tenant_id: Uuid, id: Uuid, reason: Option<String>) -> Result<Authorization> {
        self.require_row(tenant_id, id, false).await?;
        let row = self
            .db
            .revoke_authorization(id, reason.as_deref(), Utc::now())
            .await?;
        let authorization = row.into_domain()?;

        self.audit
            .log_event(
                Some(id),
                AuditEventKind::Revoked,
                serde_json::json!({ "reason": reason }),
            )
            .await?;

        if let Err(e) = self
            .webhook
            .send_event(WebhookEventKind::MandateRevoked, &authorization, tenant_id, None)
            .await
        {
            tracing::warn!(error = %e, authorization_id = %id, "webhook enqueue failed on revoke");
        }

        Ok(authorization)
    }

    pub async fn soft_delete(&self, tenant_id: Uuid, id: Uuid) -> Result<Authorization> {
        self.require_row(tenant_id, id, false).await?;
        let row = self.db.soft_delete_authorization(id, Utc::now()).await?;
        let authorization = row.into_domain()?;

        self.audit
            .log_event(Some(id), AuditEventKind::SoftDeleted, serde_json::json!({}))
            .await?;

        Ok(authorization)
    }

    /// Restore, only applicable if currently soft-deleted and not revoked.
    pub async fn restore(&self, tenant_id: Uuid, id: Uuid) -> Result<Authorization> {
        let row = self.require_row(tenant_id, id, true).await?;
        if row.soft_delete_at.is_none() {
            return Err(GatewayError::Validation("authorization is not soft-deleted".into()));
        }
        if row.status == AuthorizationStatus::Revoked.to_string() {
            return Err(GatewayError::Validation("revoked authorizations cannot be restored".into()));
        }

        let row = self.db.restore_authorization(id).await?;
        let authorization = row.into_domain()?;

        self.audit
            .log_event(Some(id), AuditEventKind::Restored, serde_json::json!({}))
            .await?;

        Ok(authorization)
    }

    /// `READ` is audited on single-row fetch; search queries are not.
    pub async fn read(&self, tenant_id: Uuid, id: Uuid) -> Result<Authorization> {
        let row = self.require_row(tenant_id, id, false).await?;
        let authorization = row.into_domain()?;

        self.audit
            .log_event(Some(id), AuditEventKind::Read, serde_json::json!({}))
            .await?;

        Ok(authorization)
    }

    pub async fn search(
        &self,
        tenant_id: Option<Uuid>,
        filter: AuthorizationFilter,
    ) -> Result<SearchPage<Authorization>> {
        let page = self.db.search_authorizations(tenant_id, &filter).await?;
        let items = page
            .items
            .into_iter()
            .map(AuthorizationRow::into_domain)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(SearchPage {
            items,
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn require_row(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        include_soft_deleted: bool,
    ) -> Result<AuthorizationRow> {
        self.db
            .get_authorization(tenant_id, id, include_soft_deleted)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("authorization {id} not found")))
    }
}
