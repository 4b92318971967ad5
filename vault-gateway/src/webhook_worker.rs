//! Webhook Retry Worker (C8): a cooperative periodic task, per
//! `spec.md` §4.8.
//!
//! Grounded on `cyxcloud-gateway::node_monitor::NodeMonitor`'s
//! `start(self: Arc<Self>, ...) -> JoinHandle` + interval-tick idiom,
//! and `original_source/app/services/webhook_service.py::
//! retry_failed_deliveries` for the per-row re-resolve-subscription
//! logic. Cancellation uses a `tokio_util::sync::CancellationToken`
//! since the teacher's own monitor loop runs unconditionally until
//! process exit and `spec.md` §5 requires the retry worker specifically
//! to stop cleanly.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vault_store::Database;

use crate::webhook::WebhookEngine;

pub struct WebhookWorker {
    tick: Duration,
    db: Arc<Database>,
    engine: Arc<WebhookEngine>,
}

impl WebhookWorker {
    pub fn new(tick: Duration, db: Arc<Database>, engine: Arc<WebhookEngine>) -> Self {
        Self { tick, db, engine }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.tick);
            info!(tick_secs = self.tick.as_secs(), "webhook retry worker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_cycle().await {
                            error!(error = %e, "webhook retry cycle failed");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("webhook retry worker shutting down");
                        break;
                    }
                }
            }
        })
    }

    async fn run_cycle(&self) -> crate::error::Result<()> {
        let now = chrono::Utc::now();
        let due = self.db.list_due_deliveries(now).await?;
        if due.is_empty() {
            return Ok(());
        }

        let mut retried = 0;
        let mut abandoned = 0;
        for delivery in due {
            let subscription = self
                .db
                .get_subscription_any_tenant(delivery.subscription_id)
                .await?;

            match subscription {
                Some(sub) if sub.is_active => {
                    self.engine.attempt(&delivery, &sub).await?;
                    retried += 1;
                }
                _ => {
                    debug!(delivery_id = %delivery.id, "subscription inactive or missing, abandoning retry");
                    self.db.clear_next_attempt(delivery.id).await?;
                    abandoned += 1;
                }
            }
        }

        if retried > 0 || abandoned > 0 {
            info!(retried, abandoned, "webhook retry cycle complete");
        }
        Ok(())
    }
}
