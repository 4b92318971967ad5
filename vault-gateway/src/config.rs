//! Process-wide configuration, aggregated from per-subsystem
//! `*Config::from_env()` structs, grounded on `cyxcloud-gateway::auth::
//! AuthConfig::from_env` / `node_monitor::NodeMonitorConfig::from_env`.

use std::time::Duration;

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Feature flags gating `DelegatedToken` protocol acceptance, per
/// `spec.md` §6 "Configuration".
#[derive(Debug, Clone)]
pub struct DelegatedTokenFeatureConfig {
    pub enabled: bool,
    /// Non-empty ⇒ only these issuer (psp) ids may create delegated tokens.
    pub psp_allowlist: Vec<String>,
}

impl DelegatedTokenFeatureConfig {
    pub fn from_env() -> Self {
        let psp_allowlist = std::env::var("FEATURE_DELEGATED_TOKEN_PSP_ALLOWLIST")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            enabled: env_bool("FEATURE_DELEGATED_TOKEN_ENABLED", true),
            psp_allowlist,
        }
    }

    pub fn issuer_allowed(&self, psp_id: &str) -> bool {
        self.psp_allowlist.is_empty() || self.psp_allowlist.iter().any(|p| p == psp_id)
    }
}

#[derive(Debug, Clone)]
pub struct TrustStoreConfig {
    pub refresh_interval: Duration,
    /// Base URL for `did:example:<id>` resolution (configured, per `spec.md` §4.1).
    pub did_example_base_url: Option<String>,
}

impl TrustStoreConfig {
    pub fn from_env() -> Self {
        Self {
            refresh_interval: env_duration_secs("TRUSTSTORE_REFRESH_INTERVAL_SECONDS", 3600),
            did_example_base_url: std::env::var("TRUSTSTORE_DID_EXAMPLE_BASE_URL").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub worker_tick: Duration,
    pub default_max_attempts: i32,
    pub default_base_delay_seconds: i32,
    pub default_timeout_seconds: i32,
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        Self {
            worker_tick: env_duration_secs("WEBHOOK_WORKER_TICK_SECONDS", 60),
            default_max_attempts: std::env::var("WEBHOOK_DEFAULT_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            default_base_delay_seconds: std::env::var("WEBHOOK_DEFAULT_BASE_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            default_timeout_seconds: std::env::var("WEBHOOK_DEFAULT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub reaper_interval: Duration,
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        Self {
            reaper_interval: env_duration_secs("RETENTION_REAPER_INTERVAL_SECONDS", 24 * 3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InboundConfig {
    pub shared_secret: String,
}

impl InboundConfig {
    pub fn from_env() -> Self {
        Self {
            shared_secret: std::env::var("INBOUND_SHARED_SECRET")
                .unwrap_or_else(|_| "dev-inbound-secret".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        Self {
            requests_per_minute: std::env::var("RATE_LIMIT_REQUESTS_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
        }
    }
}

/// Aggregate configuration, realizing `spec.md` §6's "Configuration
/// (process-wide, enumerated)" list as a single struct, following the
/// teacher's `GatewayConfig::from_env` composition idiom.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub database_url: String,
    pub delegated_token: DelegatedTokenFeatureConfig,
    pub truststore: TrustStoreConfig,
    pub webhook: WebhookConfig,
    pub retention: RetentionConfig,
    pub inbound: InboundConfig,
    pub rate_limit: RateLimitConfig,
    pub auth_secret: String,
}

impl VaultConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/vault".to_string()),
            delegated_token: DelegatedTokenFeatureConfig::from_env(),
            truststore: TrustStoreConfig::from_env(),
            webhook: WebhookConfig::from_env(),
            retention: RetentionConfig::from_env(),
            inbound: InboundConfig::from_env(),
            rate_limit: RateLimitConfig::from_env(),
            auth_secret: std::env::var("AUTH_SHARED_SECRET")
                .unwrap_or_else(|_| "dev-auth-secret".to_string()),
        }
    }
}
