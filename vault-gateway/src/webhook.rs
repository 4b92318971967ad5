//! Webhook Delivery Engine (C7), per `spec.md` §4.7.
//!
//! Grounded on `original_source/app/services/webhook_service.py`
//! (`send_webhook_event`/`_deliver_webhook`/`_attempt_delivery`/
//! `_handle_delivery_failure`'s exponential backoff formula), adapted
//! to sign the exact serialized JSON bytes once and reuse them for both
//! the HTTP body and the HMAC — *not* the timestamp-prefixed scheme
//! seen in some reference webhook dispatchers, per `spec.md` §4.7's
//! explicit "serialize once, reuse bytes" requirement.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use vault_core::{Authorization, WebhookEventKind};
use vault_store::{Database, WebhookDeliveryRow, WebhookSubscriptionRow};

use crate::error::Result;

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookEngine {
    db: std::sync::Arc<Database>,
    http: reqwest::Client,
}

impl WebhookEngine {
    pub fn new(db: std::sync::Arc<Database>, http: reqwest::Client) -> Self {
        Self { db, http }
    }

    fn build_payload(kind: WebhookEventKind, authorization: &Authorization, extras: Option<Value>) -> Value {
        let mut payload = serde_json::json!({
            "event_type": kind.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
            "mandate": {
                "id": authorization.id,
                "protocol": authorization.protocol.to_string(),
                "issuer": authorization.issuer,
                "subject": authorization.subject,
                "status": authorization.status.to_string(),
                "scope": authorization.scope,
                "amount_limit": authorization.amount_limit.map(|a| a.to_string()),
                "currency": authorization.currency.map(|c| c.to_string()),
                "expires_at": authorization.expires_at,
            },
        });
        if let Some(extras) = extras {
            if let (Value::Object(base), Value::Object(extra)) = (&mut payload, extras) {
                base.extend(extra);
            }
        }
        payload
    }

    /// `SendEvent(kind, authorization, tenant, extras?)`.
    #[instrument(skip(self, authorization, extras))]
    pub async fn send_event(
        &self,
        kind: WebhookEventKind,
        authorization: &Authorization,
        tenant_id: Uuid,
        extras: Option<Value>,
    ) -> Result<()> {
        let subscriptions = self
            .db
            .list_active_subscriptions_for_event(tenant_id, kind.as_str())
            .await?;
        if subscriptions.is_empty() {
            return Ok(());
        }

        let payload = Self::build_payload(kind, authorization, extras);

        for subscription in subscriptions {
            let delivery = self
                .db
                .create_delivery(
                    subscription.id,
                    Some(authorization.id),
                    kind.as_str(),
                    payload.clone(),
                )
                .await?;
            self.attempt(&delivery, &subscription).await?;
        }

        Ok(())
    }

    /// Single delivery attempt, per `spec.md` §4.7 "Single attempt".
    /// Used both by immediate emission and by the retry worker (C8).
    #[instrument(skip(self, delivery, subscription))]
    pub async fn attempt(
        &self,
        delivery: &WebhookDeliveryRow,
        subscription: &WebhookSubscriptionRow,
    ) -> Result<()> {
        let attempts = delivery.attempts + 1;

        // Serialize once; these exact bytes are both the HTTP body and the
        // HMAC input, per spec.md's canonical-form requirement.
        let body_bytes = serde_json::to_vec(&delivery.payload)
            .map_err(|e| crate::error::GatewayError::Internal(e.into()))?;

        let mut request = self
            .http
            .post(&subscription.target_url)
            .header("Content-Type", "application/json")
            .timeout(std::time::Duration::from_secs(subscription.timeout_seconds as u64));

        if let Some(secret) = &subscription.secret {
            let signature = sign(secret, &body_bytes);
            request = request.header("X-Webhook-Signature", format!("sha256={signature}"));
        }

        let outcome = request.body(body_bytes).send().await;

        let (status_code, response_body, success) = match outcome {
            Ok(response) => {
                let status = response.status();
                let success = status.is_success();
                let code = status.as_u16() as i32;
                let text = response.text().await.unwrap_or_default();
                let excerpt: String = text.chars().take(1000).collect();
                (Some(code), Some(excerpt), success)
            }
            Err(e) => (None, Some(e.to_string()), false),
        };

        let now = Utc::now();
        let (delivered_at, next_attempt_at, first_failed_at) = if success {
            (Some(now), None, delivery.first_failed_at)
        } else if attempts < subscription.max_attempts {
            let delay_secs = (subscription.base_delay_seconds as i64) * 2i64.pow((attempts - 1) as u32);
            (
                None,
                Some(now + chrono::Duration::seconds(delay_secs)),
                Some(delivery.first_failed_at.unwrap_or(now)),
            )
        } else {
            (None, None, Some(delivery.first_failed_at.unwrap_or(now)))
        };

        self.db
            .record_delivery_attempt(
                delivery.id,
                attempts,
                status_code,
                response_body.as_deref(),
                first_failed_at,
                delivered_at,
                next_attempt_at,
            )
            .await?;

        if success {
            info!(delivery_id = %delivery.id, url = %subscription.target_url, attempts, "webhook delivered");
        } else {
            warn!(
                delivery_id = %delivery.id,
                url = %subscription.target_url,
                attempts,
                next_attempt_at = ?next_attempt_at,
                "webhook delivery attempt failed"
            );
        }

        Ok(())
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_is_deterministic() {
        let a = sign("secret", b"{\"a\":1}");
        let b = sign("secret", b"{\"a\":1}");
        assert_eq!(a, b);
        assert_ne!(a, sign("other-secret", b"{\"a\":1}"));
    }
}
