//! Application composition root: wires the persistence layer, trust
//! store, verification dispatcher, auth service, and webhook HTTP
//! client into one `Arc`-shared handle, per the teacher's
//! `cyxcloud_gateway::state::AppState::with_config` pattern (simplified:
//! this service has no optional in-memory fallback or feature-gated
//! blockchain client).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use vault_store::Database;

use crate::audit::AuditLog;
use crate::auth::AuthService;
use crate::config::VaultConfig;
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::evidence::EvidencePackBuilder;
use crate::inbound::InboundReceiver;
use crate::lifecycle::LifecycleCoordinator;
use crate::ratelimit::RateLimiter;
use crate::truststore::TrustStore;
use crate::verifiers::{DelegatedTokenVerifier, JwtVcVerifier};
use crate::webhook::WebhookEngine;

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

pub struct Inner {
    pub config: VaultConfig,
    pub db: Arc<Database>,
    pub trust_store: Arc<TrustStore>,
    pub auth: AuthService,
    pub http: reqwest::Client,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub webhook: Arc<WebhookEngine>,
    pub evidence: Arc<EvidencePackBuilder>,
    pub inbound: Arc<InboundReceiver>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub async fn new(config: VaultConfig) -> Result<Self> {
        let db = Arc::new(
            Database::new(vault_store::DbConfig {
                url: config.database_url.clone(),
                ..vault_store::DbConfig::from_env()
            })
            .await?,
        );
        db.migrate().await?;

        let trust_store = Arc::new(TrustStore::new(config.truststore.clone()));

        let dispatcher = Arc::new(Dispatcher::new(vec![
            Box::new(JwtVcVerifier::new(trust_store.clone())),
            Box::new(DelegatedTokenVerifier::new()),
        ]));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.webhook.default_timeout_seconds as u64))
            .build()
            .map_err(|e| crate::error::GatewayError::Internal(e.into()))?;

        let audit = Arc::new(AuditLog::new(db.clone()));
        let auth = AuthService::new(&config.auth_secret);
        let webhook = Arc::new(WebhookEngine::new(db.clone(), http.clone()));
        let lifecycle = Arc::new(LifecycleCoordinator::new(
            db.clone(),
            dispatcher,
            audit.clone(),
            webhook.clone(),
        ));
        let evidence = Arc::new(EvidencePackBuilder::new(db.clone(), audit.clone()));
        let inbound = Arc::new(InboundReceiver::new(
            db.clone(),
            audit.clone(),
            webhook.clone(),
            config.inbound.shared_secret.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.requests_per_minute));

        Ok(Self(Arc::new(Inner {
            config,
            db,
            trust_store,
            auth,
            http,
            lifecycle,
            webhook,
            evidence,
            inbound,
            rate_limiter,
        })))
    }

    pub fn config(&self) -> &VaultConfig {
        &self.0.config
    }

    pub fn db(&self) -> &Database {
        &self.0.db
    }

    pub fn db_arc(&self) -> Arc<Database> {
        self.0.db.clone()
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.0.trust_store
    }

    pub fn auth(&self) -> &AuthService {
        &self.0.auth
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.0.http
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleCoordinator> {
        &self.0.lifecycle
    }

    pub fn webhook(&self) -> &Arc<WebhookEngine> {
        &self.0.webhook
    }

    pub fn evidence(&self) -> &Arc<EvidencePackBuilder> {
        &self.0.evidence
    }

    pub fn inbound(&self) -> &Arc<InboundReceiver> {
        &self.0.inbound
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.0.rate_limiter
    }
}

impl FromRef<AppState> for AppState {
    fn from_ref(state: &AppState) -> Self {
        state.clone()
    }
}
