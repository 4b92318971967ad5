//! Audit Log Writer (C4): persists append-only events via
//! `vault_store::Database::log_event` and mirrors them to structured
//! logs, per `spec.md` §4.4.
//!
//! Generalizes the teacher's tracing-only `cyxcloud_gateway::audit`
//! (`audit_log`/`target: "audit"` convention) onto a persisted writer;
//! the `authorization_id` stays optional so the writer "is safe to call
//! before the authorization row exists" as the spec requires.

use serde_json::Value;
use tracing::info;
use uuid::Uuid;
use vault_core::AuditEventKind;
use vault_store::{AuditEventRow, Database};

use crate::error::Result;

pub struct AuditLog {
    db: std::sync::Arc<Database>,
}

impl AuditLog {
    pub fn new(db: std::sync::Arc<Database>) -> Self {
        Self { db }
    }

    /// `LogEvent(authorization_id?, kind, details_map)`.
    pub async fn log_event(
        &self,
        authorization_id: Option<Uuid>,
        kind: AuditEventKind,
        details: Value,
    ) -> Result<AuditEventRow> {
        let row = self
            .db
            .log_event(authorization_id, &kind.to_string(), details)
            .await?;

        info!(
            target: "audit",
            authorization_id = ?authorization_id,
            kind = %kind,
            audit_id = %row.id,
            "{}",
            serde_json::json!({
                "audit_id": row.id,
                "authorization_id": authorization_id,
                "kind": kind.to_string(),
                "details": row.details,
                "timestamp": row.created_at,
            }),
        );

        Ok(row)
    }

    pub async fn list_events(&self, authorization_id: Uuid) -> Result<Vec<AuditEventRow>> {
        Ok(self.db.list_audit_events(authorization_id).await?)
    }
}
