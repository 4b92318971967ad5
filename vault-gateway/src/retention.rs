//! Retention reaper: periodic `Purge` execution per `spec.md` §4.6
//! "Purge" — iterates `ListPurgeable`, emits `PURGED` audit, then
//! permanently deletes each row.
//!
//! Grounded on the same `node_monitor.rs` interval-tick idiom as
//! `webhook_worker.rs`, generalizing
//! `original_source/app/services/mandate_service.py::
//! cleanup_expired_retention`'s fixed 365-day cutoff into the per-row
//! `soft_delete_at + retention_days` rule `vault_core::Authorization::
//! is_purgeable` already implements.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vault_core::AuditEventKind;
use vault_store::Database;

use crate::audit::AuditLog;

pub struct RetentionReaper {
    tick: Duration,
    db: Arc<Database>,
    audit: Arc<AuditLog>,
}

impl RetentionReaper {
    pub fn new(tick: Duration, db: Arc<Database>, audit: Arc<AuditLog>) -> Self {
        Self { tick, db, audit }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            info!(tick_secs = self.tick.as_secs(), "retention reaper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!(error = %e, "retention reaper cycle failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("retention reaper shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn run_cycle(&self) -> crate::error::Result<()> {
        let now = chrono::Utc::now();
        let purgeable = self.db.list_purgeable(now).await?;
        if purgeable.is_empty() {
            return Ok(());
        }

        let mut purged = 0;
        for row in purgeable {
            self.audit
                .log_event(
                    Some(row.id),
                    AuditEventKind::Purged,
                    serde_json::json!({ "soft_delete_at": row.soft_delete_at }),
                )
                .await?;
            self.db.purge_authorization(row.id).await?;
            purged += 1;
        }

        info!(purged, "retention reaper purged expired authorizations");
        Ok(())
    }
}
