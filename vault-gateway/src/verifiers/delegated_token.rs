//! Delegated-Token verifier: a stateless schema-and-constraint check,
//! per `spec.md` §4.2.2.
//!
//! Grounded on `original_source/app/protocols/acp/schemas.py`'s
//! `ACPDelegatedToken` field validators (identifier lengths, character
//! blocklist, currency allow-list, amount bounds) and
//! `app/protocols/acp/verify.py`'s rule ordering (expiry → amount
//! sanity → constraint coherence → valid).

use chrono::{DateTime, Utc};
use serde_json::Value;
use vault_core::{Amount, Currency, ProtocolTag, VerificationResult, VerificationStatus, Verifier};

use crate::verifiers::invalid_format;

const FORBIDDEN_CHARS: [char; 7] = ['<', '>', '"', '\'', '\\', '\r', '\n'];

fn valid_identifier(s: &str) -> bool {
    let len_ok = (1..=255).contains(&s.chars().count());
    len_ok && !s.chars().any(|c| c == '\0' || FORBIDDEN_CHARS.contains(&c))
}

struct ParsedToken {
    token_id: String,
    psp_id: String,
    merchant_id: String,
    max_amount: Amount,
    currency: Currency,
    expires_at: DateTime<Utc>,
    constraints: Value,
}

fn parse(payload: &Value) -> Result<ParsedToken, String> {
    let obj = payload
        .as_object()
        .ok_or_else(|| "payload must be a JSON object".to_string())?;

    let string_field = |name: &str| -> Result<String, String> {
        let v = obj
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("missing or non-string field: {name}"))?;
        if !valid_identifier(v) {
            return Err(format!("invalid {name}: length/character constraints violated"));
        }
        Ok(v.to_string())
    };

    let token_id = string_field("token_id")?;
    let psp_id = string_field("psp_id")?;
    let merchant_id = string_field("merchant_id")?;

    let max_amount_str = obj
        .get("max_amount")
        .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| format!("{f:.2}"))))
        .ok_or_else(|| "missing field: max_amount".to_string())?;
    let max_amount =
        Amount::parse(&max_amount_str).map_err(|e| format!("invalid max_amount: {e}"))?;
    if !max_amount.is_positive() {
        return Err("max_amount must be greater than zero".to_string());
    }

    let currency_str = obj
        .get("currency")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing field: currency".to_string())?;
    let currency = Currency::parse(currency_str).map_err(|e| format!("invalid currency: {e}"))?;

    let expires_at_str = obj
        .get("expires_at")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing field: expires_at".to_string())?;
    let expires_at = DateTime::parse_from_rfc3339(expires_at_str)
        .map_err(|e| format!("invalid expires_at: {e}"))?
        .with_timezone(&Utc);

    let constraints = obj
        .get("constraints")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    Ok(ParsedToken {
        token_id,
        psp_id,
        merchant_id,
        max_amount,
        currency,
        expires_at,
        constraints,
    })
}

#[derive(Default)]
pub struct DelegatedTokenVerifier;

impl DelegatedTokenVerifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Verifier for DelegatedTokenVerifier {
    fn protocol(&self) -> ProtocolTag {
        ProtocolTag::DelegatedToken
    }

    async fn verify(
        &self,
        raw_payload: &Value,
        _expected_scope: Option<&Value>,
    ) -> VerificationResult {
        // Step 1: schema validation.
        let parsed = match parse(raw_payload) {
            Ok(p) => p,
            Err(reason) => return invalid_format(reason),
        };

        let scope = serde_json::json!({ "constraints": parsed.constraints });

        // Step 2: expiry. Fields are still populated so the reject can be audited.
        if parsed.expires_at <= Utc::now() {
            return VerificationResult {
                status: Some(VerificationStatus::Expired),
                reason: format!("delegated token expired at {}", parsed.expires_at),
                issuer: Some(parsed.psp_id),
                subject: Some(parsed.merchant_id),
                amount_limit: Some(parsed.max_amount),
                currency: Some(parsed.currency),
                expires_at: Some(parsed.expires_at),
                scope,
                details: serde_json::json!({ "token_id": parsed.token_id }),
            };
        }

        // Step 3: amount sanity. Unreachable given schema validation above
        // (max_amount is always parsed positive-or-zero) but kept per
        // spec.md §4.2.2 step 3's robustness note.
        if !parsed.max_amount.is_positive() {
            return VerificationResult {
                status: Some(VerificationStatus::Revoked),
                reason: "INVALID_LIMIT: max_amount must be greater than zero".into(),
                issuer: Some(parsed.psp_id),
                subject: Some(parsed.merchant_id),
                amount_limit: Some(parsed.max_amount),
                currency: Some(parsed.currency),
                expires_at: Some(parsed.expires_at),
                scope,
                details: serde_json::json!({ "token_id": parsed.token_id }),
            };
        }

        // Step 4: constraint coherence.
        if let Some(constraint_merchant) = parsed.constraints.get("merchant").and_then(Value::as_str) {
            if constraint_merchant != parsed.merchant_id {
                return VerificationResult {
                    status: Some(VerificationStatus::ScopeInvalid),
                    reason: "MERCHANT_MISMATCH: constraints.merchant does not match merchant_id".into(),
                    issuer: Some(parsed.psp_id),
                    subject: Some(parsed.merchant_id),
                    amount_limit: Some(parsed.max_amount),
                    currency: Some(parsed.currency),
                    expires_at: Some(parsed.expires_at),
                    scope,
                    details: serde_json::json!({ "token_id": parsed.token_id }),
                };
            }
        }

        // Step 5: valid.
        VerificationResult {
            status: Some(VerificationStatus::Valid),
            reason: "delegated token verification passed".into(),
            issuer: Some(parsed.psp_id),
            subject: Some(parsed.merchant_id),
            amount_limit: Some(parsed.max_amount),
            currency: Some(parsed.currency),
            expires_at: Some(parsed.expires_at),
            scope,
            details: serde_json::json!({ "token_id": parsed.token_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> Value {
        serde_json::json!({
            "token_id": "tok-1",
            "psp_id": "psp-1",
            "merchant_id": "merchant-1",
            "max_amount": "100.00",
            "currency": "USD",
            "expires_at": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
        })
    }

    #[tokio::test]
    async fn accepts_well_formed_token() {
        let result = DelegatedTokenVerifier::new().verify(&valid_payload(), None).await;
        assert_eq!(result.status, Some(VerificationStatus::Valid));
    }

    #[tokio::test]
    async fn rejects_forbidden_characters_in_identifier() {
        let mut payload = valid_payload();
        payload["merchant_id"] = serde_json::json!("bad<script>");
        let result = DelegatedTokenVerifier::new().verify(&payload, None).await;
        assert_eq!(result.status, Some(VerificationStatus::InvalidFormat));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let mut payload = valid_payload();
        payload["expires_at"] = serde_json::json!((Utc::now() - chrono::Duration::hours(1)).to_rfc3339());
        let result = DelegatedTokenVerifier::new().verify(&payload, None).await;
        assert_eq!(result.status, Some(VerificationStatus::Expired));
    }

    #[tokio::test]
    async fn rejects_merchant_mismatch() {
        let mut payload = valid_payload();
        payload["constraints"] = serde_json::json!({ "merchant": "someone-else" });
        let result = DelegatedTokenVerifier::new().verify(&payload, None).await;
        assert_eq!(result.status, Some(VerificationStatus::ScopeInvalid));
    }

    #[tokio::test]
    async fn scope_nests_constraints_for_search_lookup() {
        let mut payload = valid_payload();
        payload["constraints"] = serde_json::json!({ "merchant": "merchant-1", "category": "travel" });
        let result = DelegatedTokenVerifier::new().verify(&payload, None).await;
        assert_eq!(
            result.scope,
            serde_json::json!({ "constraints": { "merchant": "merchant-1", "category": "travel" } })
        );
    }

    #[tokio::test]
    async fn rejects_zero_amount_at_schema_stage() {
        let mut payload = valid_payload();
        payload["max_amount"] = serde_json::json!("0.00");
        let result = DelegatedTokenVerifier::new().verify(&payload, None).await;
        assert_eq!(result.status, Some(VerificationStatus::InvalidFormat));
    }
}
