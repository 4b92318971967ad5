//! JWT-VC verifier: validates a compact-serialized JWS against the
//! Trust Store (C1), per `spec.md` §4.2.1.
//!
//! Step order is taken directly from
//! `original_source/app/services/verification_service.py`'s
//! `verify_mandate` (structure → signature → expiry → scope), with the
//! decode/required-claims check grounded on
//! `app/utils/jwt_verification.py::verify_jwt_structure`.

use std::sync::Arc;

use base64::Engine;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tracing::instrument;
use vault_core::{Amount, Currency, ProtocolTag, VerificationResult, VerificationStatus, Verifier};

use crate::truststore::{TrustStore, TrustStoreError};
use crate::verifiers::{invalid_format, missing_field};

const REQUIRED_CLAIMS: [&str; 4] = ["iss", "sub", "iat", "exp"];

pub struct JwtVcVerifier {
    trust_store: Arc<TrustStore>,
}

impl JwtVcVerifier {
    pub fn new(trust_store: Arc<TrustStore>) -> Self {
        Self { trust_store }
    }
}

fn decode_segment(segment: &str) -> Option<Value> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(segment)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[async_trait::async_trait]
impl Verifier for JwtVcVerifier {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::JwtVc
    }

    #[instrument(skip(self, raw_payload, expected_scope))]
    async fn verify(
        &self,
        raw_payload: &Value,
        expected_scope: Option<&Value>,
    ) -> VerificationResult {
        let token = match raw_payload.as_str() {
            Some(t) => t,
            None => return invalid_format("vc_jwt is not a string"),
        };

        // Step 1: structural decode.
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return invalid_format("malformed JWT: expected 3 dot-separated segments");
        }
        if decode_segment(segments[0]).is_none() {
            return invalid_format("malformed JWT: header is not valid JSON");
        }
        let payload = match decode_segment(segments[1]) {
            Some(Value::Object(map)) => Value::Object(map),
            _ => return invalid_format("malformed JWT: payload is not a JSON object"),
        };

        // Step 2: required claims.
        let missing: Vec<&str> = REQUIRED_CLAIMS
            .iter()
            .filter(|c| payload.get(**c).is_none())
            .copied()
            .collect();
        if !missing.is_empty() {
            return missing_field(missing.join(", "));
        }

        let issuer = payload["iss"].as_str().unwrap_or_default().to_string();
        let subject = payload["sub"].as_str().map(str::to_string);

        // Step 3: signature verification via the trust store.
        if let Err(e) = self.trust_store.verify_signature(token, &issuer).await {
            let status = match e {
                TrustStoreError::NotTrusted => VerificationStatus::IssuerUnknown,
                TrustStoreError::InvalidSignature | TrustStoreError::InvalidKeySet(_) => {
                    VerificationStatus::SigInvalid
                }
            };
            return VerificationResult {
                status: Some(status),
                reason: e.to_string(),
                issuer: Some(issuer),
                subject,
                scope: payload.get("scope").cloned().unwrap_or(Value::Null),
                ..Default::default()
            };
        }

        // Step 4: expiry.
        let exp = payload["exp"].as_i64().unwrap_or(0);
        let expires_at = Utc.timestamp_opt(exp, 0).single();
        if exp <= Utc::now().timestamp() {
            return VerificationResult {
                status: Some(VerificationStatus::Expired),
                reason: format!("token expired at {exp}"),
                issuer: Some(issuer),
                subject,
                expires_at,
                scope: payload.get("scope").cloned().unwrap_or(Value::Null),
                ..Default::default()
            };
        }

        // Step 5: optional scope constraint.
        let scope = payload.get("scope").cloned().unwrap_or(Value::Null);
        if let Some(expected) = expected_scope {
            if &scope != expected {
                return VerificationResult {
                    status: Some(VerificationStatus::ScopeInvalid),
                    reason: "scope mismatch".into(),
                    issuer: Some(issuer),
                    subject,
                    expires_at,
                    scope,
                    ..Default::default()
                };
            }
        }

        // Step 6: valid. amount_limit is stored by the outer credential as
        // a freeform string ("5000.00 USD"); parse it opportunistically
        // but leave hard failures to the lifecycle coordinator.
        let (amount_limit, currency) = payload
            .get("amount_limit")
            .and_then(Value::as_str)
            .and_then(parse_amount_limit)
            .unzip();

        VerificationResult {
            status: Some(VerificationStatus::Valid),
            reason: "all verification checks passed".into(),
            issuer: Some(issuer),
            subject,
            amount_limit,
            currency,
            expires_at,
            scope,
            details: payload,
        }
    }
}

fn parse_amount_limit(s: &str) -> Option<(Amount, Currency)> {
    let (amount, currency) = s.trim().split_once(' ')?;
    let amount = Amount::parse(amount).ok()?;
    let currency = Currency::parse(currency).ok()?;
    Some((amount, currency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustStoreConfig;

    fn verifier() -> JwtVcVerifier {
        let trust_store = Arc::new(TrustStore::new(TrustStoreConfig {
            refresh_interval: std::time::Duration::from_secs(3600),
            did_example_base_url: None,
        }));
        JwtVcVerifier::new(trust_store)
    }

    #[tokio::test]
    async fn rejects_non_string_payload() {
        let result = verifier().verify(&serde_json::json!({"not": "a string"}), None).await;
        assert_eq!(result.status, Some(VerificationStatus::InvalidFormat));
    }

    #[tokio::test]
    async fn rejects_malformed_segments() {
        let result = verifier().verify(&Value::String("not.a.jwt.token".into()), None).await;
        assert_eq!(result.status, Some(VerificationStatus::InvalidFormat));
    }

    #[tokio::test]
    async fn rejects_unknown_issuer() {
        let header = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(serde_json::json!({"alg":"RS256"}).to_string());
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(
            serde_json::json!({
                "iss": "did:example:unknown",
                "sub": "subject-1",
                "iat": 0,
                "exp": 9_999_999_999i64,
            })
            .to_string(),
        );
        let token = format!("{header}.{payload}.sig");
        let result = verifier().verify(&Value::String(token), None).await;
        assert_eq!(result.status, Some(VerificationStatus::IssuerUnknown));
    }

    #[test]
    fn parses_amount_limit_string() {
        let (amount, currency) = parse_amount_limit("5000.00 USD").unwrap();
        assert_eq!(amount.to_string(), "5000.00");
        assert_eq!(currency.as_str(), "USD");
    }
}
