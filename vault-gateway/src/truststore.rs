//! Trust Store (C1): TTL-cached issuer→JWKS mapping with single-flight
//! refresh coalescing and JWS signature verification.
//!
//! Grounded on `original_source/app/services/truststore_service.py`
//! (DID-scheme URL mapping, JWK validation rules, TTL refresh,
//! "expired-but-signature-valid ⇒ Valid" rule) and the teacher's
//! `RwLock`-guarded many-readers/occasional-writer discipline in
//! `cyxcloud-gateway::auth::AuthService`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use crate::config::TrustStoreConfig;

#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("issuer not trusted")]
    NotTrusted,
    #[error("signature invalid")]
    InvalidSignature,
    #[error("malformed key set: {0}")]
    InvalidKeySet(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    #[serde(rename = "use")]
    pub use_: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
    pub k: Option<String>,
}

impl Jwk {
    /// Validates the shape rules of `spec.md` §4.1: `kty ∈ {RSA, EC,
    /// oct}`; RSA requires `n`,`e`; EC requires `crv`,`x`,`y`; if `alg`
    /// is present it must be compatible with `kty`.
    pub fn validate(&self) -> Result<(), TrustStoreError> {
        match self.kty.as_str() {
            "RSA" => {
                if self.n.is_none() || self.e.is_none() {
                    return Err(TrustStoreError::InvalidKeySet(
                        "RSA key missing n/e".into(),
                    ));
                }
                if let Some(alg) = &self.alg {
                    if !(alg.starts_with("RS") || alg.starts_with("PS")) {
                        return Err(TrustStoreError::InvalidKeySet(format!(
                            "alg {alg} incompatible with kty RSA"
                        )));
                    }
                }
            }
            "EC" => {
                if self.crv.is_none() || self.x.is_none() || self.y.is_none() {
                    return Err(TrustStoreError::InvalidKeySet(
                        "EC key missing crv/x/y".into(),
                    ));
                }
                if let Some(alg) = &self.alg {
                    if !alg.starts_with("ES") {
                        return Err(TrustStoreError::InvalidKeySet(format!(
                            "alg {alg} incompatible with kty EC"
                        )));
                    }
                }
            }
            "oct" => {
                if self.k.is_none() {
                    return Err(TrustStoreError::InvalidKeySet("oct key missing k".into()));
                }
                if let Some(alg) = &self.alg {
                    if !alg.starts_with("HS") {
                        return Err(TrustStoreError::InvalidKeySet(format!(
                            "alg {alg} incompatible with kty oct"
                        )));
                    }
                }
            }
            other => {
                return Err(TrustStoreError::InvalidKeySet(format!(
                    "unsupported kty {other}"
                )))
            }
        }
        Ok(())
    }

    fn algorithm(&self) -> Algorithm {
        match self.alg.as_deref() {
            Some("RS384") => Algorithm::RS384,
            Some("RS512") => Algorithm::RS512,
            Some("PS256") => Algorithm::PS256,
            Some("ES384") => Algorithm::ES384,
            Some("HS384") => Algorithm::HS384,
            Some("HS512") => Algorithm::HS512,
            Some("ES256") => Algorithm::ES256,
            Some("HS256") => Algorithm::HS256,
            _ => match self.kty.as_str() {
                "EC" => Algorithm::ES256,
                "oct" => Algorithm::HS256,
                _ => Algorithm::RS256,
            },
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, TrustStoreError> {
        match self.kty.as_str() {
            "RSA" => DecodingKey::from_rsa_components(
                self.n.as_deref().unwrap_or_default(),
                self.e.as_deref().unwrap_or_default(),
            )
            .map_err(|e| TrustStoreError::InvalidKeySet(e.to_string())),
            "EC" => DecodingKey::from_ec_components(
                self.x.as_deref().unwrap_or_default(),
                self.y.as_deref().unwrap_or_default(),
            )
            .map_err(|e| TrustStoreError::InvalidKeySet(e.to_string())),
            "oct" => Ok(DecodingKey::from_base64_secret(self.k.as_deref().unwrap_or_default())
                .map_err(|e| TrustStoreError::InvalidKeySet(e.to_string()))?),
            other => Err(TrustStoreError::InvalidKeySet(format!(
                "unsupported kty {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeySet {
    pub keys: Vec<Jwk>,
    pub fetched_at: DateTime<Utc>,
}

impl KeySet {
    pub fn new(keys: Vec<Jwk>) -> Result<Self, TrustStoreError> {
        if keys.is_empty() {
            return Err(TrustStoreError::InvalidKeySet("empty key set".into()));
        }
        for k in &keys {
            k.validate()?;
        }
        Ok(Self {
            keys,
            fetched_at: Utc::now(),
        })
    }

    fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self.keys.iter().find(|k| k.kid.as_deref() == Some(kid)),
            None => self.keys.first(),
        }
    }
}

/// Maps an issuer identifier to a JWKS URL per `spec.md` §4.1's
/// DID-scheme mapping.
fn resolve_jwks_url(issuer: &str, config: &TrustStoreConfig) -> Option<String> {
    if let Some(rest) = issuer.strip_prefix("did:web:") {
        let decoded = rest.replace(':', "/");
        return Some(format!("https://{decoded}/.well-known/jwks.json"));
    }
    if issuer.starts_with("did:example:") {
        let base = config.did_example_base_url.as_deref()?;
        return Some(format!("{}/{}/jwks.json", base.trim_end_matches('/'), issuer));
    }
    None
}

pub struct TrustStore {
    config: TrustStoreConfig,
    refresh_interval: chrono::Duration,
    http: reqwest::Client,
    cache: RwLock<HashMap<String, KeySet>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TrustStore {
    pub fn new(config: TrustStoreConfig) -> Self {
        let refresh_interval = chrono::Duration::from_std(config.refresh_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        Self {
            config,
            refresh_interval,
            http: reqwest::Client::new(),
            cache: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn register_issuer(&self, issuer: &str, keyset: KeySet) {
        self.cache.write().await.insert(issuer.to_string(), keyset);
    }

    pub async fn remove_issuer(&self, issuer: &str) {
        self.cache.write().await.remove(issuer);
    }

    pub async fn status(&self) -> Vec<(String, DateTime<Utc>)> {
        self.cache
            .read()
            .await
            .iter()
            .map(|(issuer, ks)| (issuer.clone(), ks.fetched_at))
            .collect()
    }

    /// `GetKeys(issuer)`: returns the cached set if within TTL, otherwise
    /// refreshes. Concurrent callers for the same stale issuer coalesce
    /// into a single outbound fetch (single-flight), per `spec.md` §4.1
    /// and §5's mutual-exclusion requirement.
    #[instrument(skip(self))]
    pub async fn get_keys(&self, issuer: &str) -> Result<KeySet, TrustStoreError> {
        if let Some(ks) = self.cache.read().await.get(issuer) {
            if Utc::now() - ks.fetched_at < self.refresh_interval {
                return Ok(ks.clone());
            }
        }

        let flight = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(issuer.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        // Another waiter may have already refreshed while we waited for the lock.
        if let Some(ks) = self.cache.read().await.get(issuer) {
            if Utc::now() - ks.fetched_at < self.refresh_interval {
                return Ok(ks.clone());
            }
        }

        match self.fetch_keyset(issuer).await {
            Ok(ks) => {
                self.cache.write().await.insert(issuer.to_string(), ks.clone());
                Ok(ks)
            }
            Err(e) => {
                // A refresh failure preserves the prior cached value only if
                // one existed; first-time failures return NotTrusted.
                if let Some(ks) = self.cache.read().await.get(issuer) {
                    warn!(issuer, error = %e, "jwks refresh failed, serving stale cache");
                    return Ok(ks.clone());
                }
                Err(TrustStoreError::NotTrusted)
            }
        }
    }

    async fn fetch_keyset(&self, issuer: &str) -> Result<KeySet, TrustStoreError> {
        let url = resolve_jwks_url(issuer, &self.config).ok_or(TrustStoreError::NotTrusted)?;

        #[derive(Deserialize)]
        struct JwksDoc {
            keys: Vec<Jwk>,
        }

        let doc: JwksDoc = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| TrustStoreError::InvalidKeySet(e.to_string()))?
            .json()
            .await
            .map_err(|e| TrustStoreError::InvalidKeySet(e.to_string()))?;

        KeySet::new(doc.keys)
    }

    /// `VerifySignature(token, issuer)`. Expired-but-otherwise-valid
    /// signatures are reported as valid; expiry is a separate concern
    /// handled by the protocol verifier.
    #[instrument(skip(self, token))]
    pub async fn verify_signature(&self, token: &str, issuer: &str) -> Result<(), TrustStoreError> {
        let keyset = self.get_keys(issuer).await?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| TrustStoreError::InvalidSignature)?;

        let jwk = keyset
            .find(header.kid.as_deref())
            .ok_or(TrustStoreError::InvalidSignature)?;

        let decoding_key = jwk.decoding_key()?;

        let mut validation = Validation::new(jwk.algorithm());
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<serde_json::Value>(token, &decoding_key, &validation)
            .map(|_| ())
            .map_err(|e| {
                debug!(issuer, error = %e, "signature verification failed");
                TrustStoreError::InvalidSignature
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_keyset() {
        assert!(KeySet::new(vec![]).is_err());
    }

    #[test]
    fn rejects_rsa_without_modulus() {
        let jwk = Jwk {
            kty: "RSA".into(),
            kid: Some("k1".into()),
            use_: None,
            alg: Some("RS256".into()),
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            k: None,
        };
        assert!(jwk.validate().is_err());
    }

    #[test]
    fn resolves_did_web() {
        let config = TrustStoreConfig {
            refresh_interval: std::time::Duration::from_secs(3600),
            did_example_base_url: None,
        };
        let url = resolve_jwks_url("did:web:issuer.example.com", &config).unwrap();
        assert_eq!(url, "https://issuer.example.com/.well-known/jwks.json");
    }

    #[test]
    fn did_example_needs_configured_base_url() {
        let config = TrustStoreConfig {
            refresh_interval: std::time::Duration::from_secs(3600),
            did_example_base_url: None,
        };
        assert!(resolve_jwks_url("did:example:bank-001", &config).is_none());
    }

    fn rsa_jwk(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".into(),
            kid: Some(kid.into()),
            use_: None,
            alg: Some("RS256".into()),
            n: Some("n".into()),
            e: Some("e".into()),
            crv: None,
            x: None,
            y: None,
            k: None,
        }
    }

    #[test]
    fn find_matches_by_kid() {
        let ks = KeySet::new(vec![rsa_jwk("k1"), rsa_jwk("k2")]).unwrap();
        assert_eq!(ks.find(Some("k2")).unwrap().kid.as_deref(), Some("k2"));
    }

    #[test]
    fn find_does_not_fall_back_when_kid_is_absent_from_the_set() {
        let ks = KeySet::new(vec![rsa_jwk("k1")]).unwrap();
        assert!(ks.find(Some("unknown-kid")).is_none());
    }
}
