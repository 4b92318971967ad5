//! Inbound Webhook Receiver (C9), per `spec.md` §4.9.
//!
//! Processing order follows the spec exactly: signature check →
//! idempotency check → resolve token → apply effect → persist the
//! inbound event *last*, so "a failure between steps 5-6 and 7 results
//! in safe replay". HMAC verification reuses the `hmac`/`sha2`/`hex`
//! stack already wired for outbound signing in `crate::webhook`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use vault_core::{AuditEventKind, AuthorizationStatus, WebhookEventKind};
use vault_store::Database;

use crate::audit::AuditLog;
use crate::error::{GatewayError, Result};
use crate::webhook::WebhookEngine;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    pub event_id: String,
    pub event_type: String,
    #[allow(dead_code)]
    pub timestamp: DateTime<Utc>,
    pub data: InboundEventData,
}

#[derive(Debug, Deserialize)]
pub struct InboundEventData {
    pub token_id: String,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InboundOutcome {
    Processed,
    AlreadyProcessed,
}

pub struct InboundReceiver {
    db: std::sync::Arc<Database>,
    audit: std::sync::Arc<AuditLog>,
    webhook: std::sync::Arc<WebhookEngine>,
    shared_secret: String,
}

impl InboundReceiver {
    pub fn new(
        db: std::sync::Arc<Database>,
        audit: std::sync::Arc<AuditLog>,
        webhook: std::sync::Arc<WebhookEngine>,
        shared_secret: String,
    ) -> Self {
        Self {
            db,
            audit,
            webhook,
            shared_secret,
        }
    }

    /// Step 1-2: verify `X-ACP-Signature` over the raw request bytes.
    pub fn verify_signature(&self, body: &[u8], signature_header: &str) -> bool {
        let Ok(expected) = hex::decode(signature_header) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.shared_secret.as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }

    pub async fn process(&self, event: InboundEvent) -> Result<InboundOutcome> {
        // Step 3: idempotency.
        if self.db.inbound_event_exists(&event.event_id).await? {
            return Ok(InboundOutcome::AlreadyProcessed);
        }

        // Step 4: resolve the authorization by the delegated-token
        // `token_id` carried in its credential (administrator-scoped
        // lookup since the inbound event carries no bearer tenant
        // claim).
        let row = self
            .db
            .get_authorization_by_token_id(&event.data.token_id, false)
            .await?
            .ok_or_else(|| {
                GatewayError::NotFound(format!(
                    "authorization with token_id {} not found",
                    event.data.token_id
                ))
            })?;
        let authorization = row.into_domain()?;

        match event.event_type.as_str() {
            // Step 5.
            "token.used" => {
                self.audit
                    .log_event(
                        Some(authorization.id),
                        AuditEventKind::TokenUsed,
                        serde_json::json!({
                            "amount": event.data.amount,
                            "currency": event.data.currency,
                            "transaction_id": event.data.transaction_id,
                            "metadata": event.data.metadata,
                        }),
                    )
                    .await?;
            }
            // Step 6.
            "token.revoked" => {
                let revoked_row = self
                    .db
                    .revoke_authorization(authorization.id, event.data.reason.as_deref(), Utc::now())
                    .await?;
                let revoked = revoked_row.into_domain()?;

                self.audit
                    .log_event(
                        Some(authorization.id),
                        AuditEventKind::TokenRevokedExternal,
                        serde_json::json!({ "reason": event.data.reason }),
                    )
                    .await?;

                if let Err(e) = self
                    .webhook
                    .send_event(
                        WebhookEventKind::MandateRevoked,
                        &revoked,
                        revoked.tenant_id,
                        None,
                    )
                    .await
                {
                    tracing::warn!(error = %e, authorization_id = %authorization.id, "webhook enqueue failed on inbound revoke");
                }
                debug_assert_eq!(revoked.status, AuthorizationStatus::Revoked);
            }
            other => {
                return Err(GatewayError::Validation(format!(
                    "unsupported event_type: {other}"
                )));
            }
        }

        // Step 7: persist last, so a crash before this point replays safely.
        self.db
            .record_inbound_event(&event.event_id, &event.event_type)
            .await?;

        Ok(InboundOutcome::Processed)
    }
}
