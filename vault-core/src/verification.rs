use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::amount::{Amount, Currency};

/// Uniform verification outcome produced by every protocol verifier
/// (C2), per `spec.md` §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Valid,
    Expired,
    SigInvalid,
    IssuerUnknown,
    InvalidFormat,
    ScopeInvalid,
    MissingRequiredField,
    Revoked,
}

impl VerificationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The status an authorization's stored status collapses to on
    /// re-verification, per the table in `spec.md` §4.6 "Re-verify"
    /// step 3 (preserved verbatim — see DESIGN.md Open Question 2).
    pub fn reverify_collapse(&self) -> crate::domain::AuthorizationStatus {
        use crate::domain::AuthorizationStatus as S;
        match self {
            Self::Valid => S::Valid,
            Self::Expired => S::Expired,
            Self::Revoked => S::Revoked,
            Self::SigInvalid
            | Self::IssuerUnknown
            | Self::InvalidFormat
            | Self::ScopeInvalid
            | Self::MissingRequiredField => S::Revoked,
        }
    }
}

/// The full result shape shared by both verifiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResult {
    pub status: Option<VerificationStatus>,
    pub reason: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub amount_limit: Option<Amount>,
    pub currency: Option<Currency>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Value,
    #[serde(default)]
    pub details: Value,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        self.status.map(|s| s.is_valid()).unwrap_or(false)
    }

    pub fn status_str(&self) -> &'static str {
        match self.status {
            Some(VerificationStatus::Valid) => "VALID",
            Some(VerificationStatus::Expired) => "EXPIRED",
            Some(VerificationStatus::SigInvalid) => "SIG_INVALID",
            Some(VerificationStatus::IssuerUnknown) => "ISSUER_UNKNOWN",
            Some(VerificationStatus::InvalidFormat) => "INVALID_FORMAT",
            Some(VerificationStatus::ScopeInvalid) => "SCOPE_INVALID",
            Some(VerificationStatus::MissingRequiredField) => "MISSING_REQUIRED_FIELD",
            Some(VerificationStatus::Revoked) => "REVOKED",
            None => "UNKNOWN",
        }
    }
}

/// A single capability shared by every protocol verifier, per the
/// "polymorphic verifiers without runtime dispatch gymnastics" design
/// note in `spec.md` §9. Implementors live in `vault-gateway` since
/// they perform I/O (signature verification calls the trust store).
#[async_trait::async_trait]
pub trait Verifier: Send + Sync {
    /// The protocol tag this verifier handles.
    fn protocol(&self) -> crate::domain::ProtocolTag;

    /// Verify `raw_payload` (the protocol-specific credential body, not
    /// the outer `{protocol, payload}` envelope) and produce a uniform
    /// result. `expected_scope`, if given, is matched per §4.2.1 step 5.
    async fn verify(
        &self,
        raw_payload: &Value,
        expected_scope: Option<&Value>,
    ) -> VerificationResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_table_matches_spec() {
        assert_eq!(
            VerificationStatus::SigInvalid.reverify_collapse(),
            crate::domain::AuthorizationStatus::Revoked
        );
        assert_eq!(
            VerificationStatus::Expired.reverify_collapse(),
            crate::domain::AuthorizationStatus::Expired
        );
        assert_eq!(
            VerificationStatus::Valid.reverify_collapse(),
            crate::domain::AuthorizationStatus::Valid
        );
    }
}
