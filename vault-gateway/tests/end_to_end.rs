//! Integration tests exercising the lifecycle coordinator, dispatcher,
//! audit trail, and inbound receiver against a real (per-test) Postgres
//! database, per `spec.md` §8's scenarios 3-4 and 6.
//!
//! Uses `#[sqlx::test]` so each test gets its own freshly migrated
//! database; no shared fixture state leaks between tests.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;
use vault_core::{AuditEventKind, AuthorizationStatus, ProtocolTag};
use vault_gateway::audit::AuditLog;
use vault_gateway::dispatcher::Dispatcher;
use vault_gateway::inbound::{InboundEvent, InboundEventData, InboundOutcome, InboundReceiver};
use vault_gateway::lifecycle::LifecycleCoordinator;
use vault_gateway::verifiers::DelegatedTokenVerifier;
use vault_gateway::webhook::WebhookEngine;
use vault_store::Database;

fn delegated_token_payload(merchant: &str, constraint_merchant: Option<&str>) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "token_id": "tok-1",
        "psp_id": "psp-a",
        "merchant_id": merchant,
        "max_amount": "100.00",
        "currency": "USD",
        "expires_at": (Utc::now() + chrono::Duration::days(7)).to_rfc3339(),
    });
    if let Some(cm) = constraint_merchant {
        payload["constraints"] = serde_json::json!({ "merchant": cm });
    }
    payload
}

struct Harness {
    tenant_id: Uuid,
    db: Arc<Database>,
    lifecycle: Arc<LifecycleCoordinator>,
    audit: Arc<AuditLog>,
    webhook: Arc<WebhookEngine>,
}

async fn harness(pool: PgPool) -> Harness {
    let db = Arc::new(Database::from_pool(pool));
    let tenant_id = Uuid::new_v4();
    db.upsert_tenant(tenant_id, "acme").await.unwrap();

    let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(DelegatedTokenVerifier::new())]));
    let audit = Arc::new(AuditLog::new(db.clone()));
    let webhook = Arc::new(WebhookEngine::new(db.clone(), reqwest::Client::new()));
    let lifecycle = Arc::new(LifecycleCoordinator::new(
        db.clone(),
        dispatcher,
        audit.clone(),
        webhook.clone(),
    ));

    Harness {
        tenant_id,
        db,
        lifecycle,
        audit,
        webhook,
    }
}

#[sqlx::test(migrations = "../vault-store/migrations")]
async fn happy_path_create_audits_and_persists(pool: PgPool) {
    let h = harness(pool).await;

    let authorization = h
        .lifecycle
        .create(
            h.tenant_id,
            ProtocolTag::DelegatedToken,
            delegated_token_payload("merchant-1", None),
            90,
            Some("tester".to_string()),
        )
        .await
        .expect("creation should succeed for a well-formed token");

    assert_eq!(authorization.status, AuthorizationStatus::Valid);
    assert_eq!(authorization.tenant_id, h.tenant_id);

    let events = h.audit.list_events(authorization.id).await.unwrap();
    let kinds: Vec<String> = events.iter().map(|e| e.kind.clone()).collect();
    assert!(kinds.contains(&AuditEventKind::Verified.to_string()));
    assert!(kinds.contains(&AuditEventKind::Created.to_string()));
}

#[sqlx::test(migrations = "../vault-store/migrations")]
async fn merchant_mismatch_is_rejected_and_creates_no_row(pool: PgPool) {
    let h = harness(pool).await;

    let result = h
        .lifecycle
        .create(
            h.tenant_id,
            ProtocolTag::DelegatedToken,
            delegated_token_payload("m-acme", Some("m-other")),
            90,
            None,
        )
        .await;

    assert!(result.is_err());

    // The orphaned VERIFIED audit event (authorization_id = null) is the
    // only trace of the rejected attempt.
    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM audit_events WHERE authorization_id IS NULL AND kind = 'VERIFIED'",
    )
    .fetch_one(h.db.pool())
    .await
    .unwrap();
    assert_eq!(row.0, 1);
}

#[sqlx::test(migrations = "../vault-store/migrations")]
async fn reverify_is_idempotent_in_steady_state(pool: PgPool) {
    let h = harness(pool).await;

    let created = h
        .lifecycle
        .create(
            h.tenant_id,
            ProtocolTag::DelegatedToken,
            delegated_token_payload("merchant-1", None),
            90,
            None,
        )
        .await
        .unwrap();

    let first = h.lifecycle.reverify(h.tenant_id, created.id).await.unwrap();
    let second = h.lifecycle.reverify(h.tenant_id, created.id).await.unwrap();

    assert_eq!(first.status, AuthorizationStatus::Valid);
    assert_eq!(first.status, second.status);
    assert_eq!(first.verification_reason, second.verification_reason);
}

#[sqlx::test(migrations = "../vault-store/migrations")]
async fn revoke_is_terminal_and_blocks_restore(pool: PgPool) {
    let h = harness(pool).await;

    let created = h
        .lifecycle
        .create(
            h.tenant_id,
            ProtocolTag::DelegatedToken,
            delegated_token_payload("merchant-1", None),
            90,
            None,
        )
        .await
        .unwrap();

    let revoked = h
        .lifecycle
        .revoke(h.tenant_id, created.id, Some("fraud".into()))
        .await
        .unwrap();
    assert_eq!(revoked.status, AuthorizationStatus::Revoked);

    let restore_attempt = h.lifecycle.restore(h.tenant_id, created.id).await;
    assert!(restore_attempt.is_err());
}

#[sqlx::test(migrations = "../vault-store/migrations")]
async fn soft_delete_then_restore_returns_to_valid(pool: PgPool) {
    let h = harness(pool).await;

    let created = h
        .lifecycle
        .create(
            h.tenant_id,
            ProtocolTag::DelegatedToken,
            delegated_token_payload("merchant-1", None),
            90,
            None,
        )
        .await
        .unwrap();

    let deleted = h.lifecycle.soft_delete(h.tenant_id, created.id).await.unwrap();
    assert_eq!(deleted.status, AuthorizationStatus::Deleted);
    assert!(deleted.soft_delete_at.is_some());

    let restored = h.lifecycle.restore(h.tenant_id, created.id).await.unwrap();
    assert_eq!(restored.status, AuthorizationStatus::Valid);
    assert!(restored.soft_delete_at.is_none());
}

#[sqlx::test(migrations = "../vault-store/migrations")]
async fn inbound_revocation_is_idempotent(pool: PgPool) {
    let h = harness(pool).await;

    let created = h
        .lifecycle
        .create(
            h.tenant_id,
            ProtocolTag::DelegatedToken,
            delegated_token_payload("merchant-1", None),
            90,
            None,
        )
        .await
        .unwrap();

    let receiver = InboundReceiver::new(
        h.db.clone(),
        h.audit.clone(),
        h.webhook.clone(),
        "shared-secret".to_string(),
    );

    let event = InboundEvent {
        event_id: "e-1".to_string(),
        event_type: "token.revoked".to_string(),
        timestamp: Utc::now(),
        data: InboundEventData {
            token_id: "tok-1".to_string(),
            amount: None,
            currency: None,
            transaction_id: None,
            reason: Some("fraud".to_string()),
            metadata: serde_json::json!({}),
        },
    };

    let first = receiver.process(event).await.unwrap();
    assert_eq!(first, InboundOutcome::Processed);

    let replay = InboundEvent {
        event_id: "e-1".to_string(),
        event_type: "token.revoked".to_string(),
        timestamp: Utc::now(),
        data: InboundEventData {
            token_id: "tok-1".to_string(),
            amount: None,
            currency: None,
            transaction_id: None,
            reason: Some("fraud".to_string()),
            metadata: serde_json::json!({}),
        },
    };
    let second = receiver.process(replay).await.unwrap();
    assert_eq!(second, InboundOutcome::AlreadyProcessed);

    let row = h
        .db
        .get_authorization(h.tenant_id, created.id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "REVOKED");
}
