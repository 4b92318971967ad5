use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::amount::{Amount, Currency};
use crate::error::{Result, VaultError};

/// Which wire format an authorization was presented in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProtocolTag {
    #[serde(rename = "JWT-VC")]
    JwtVc,
    DelegatedToken,
}

impl ProtocolTag {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "JWT-VC" | "JWT_VC" | "JWTVC" => Ok(Self::JwtVc),
            "DELEGATEDTOKEN" | "DELEGATED_TOKEN" => Ok(Self::DelegatedToken),
            other => Err(VaultError::InvalidProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for ProtocolTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JwtVc => write!(f, "JWT-VC"),
            Self::DelegatedToken => write!(f, "DelegatedToken"),
        }
    }
}

/// Lifecycle status of an authorization. `Revoked` and `Deleted` are
/// terminal (see invariants in `spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthorizationStatus {
    Valid,
    Active,
    Expired,
    Revoked,
    Deleted,
}

impl AuthorizationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Revoked | Self::Deleted)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "VALID",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// The append-only event kinds recorded by the audit log writer (C4),
/// exhaustive per `spec.md` §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventKind {
    Created,
    Verified,
    Updated,
    SoftDeleted,
    Restored,
    Revoked,
    Read,
    Exported,
    Purged,
    TokenUsed,
    TokenRevokedExternal,
    TenantNotFound,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        f.write_str(&s)
    }
}

/// Kinds of outbound webhook events, mirroring `spec.md` §6's payload
/// `event_type` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEventKind {
    MandateCreated,
    MandateVerificationFailed,
    MandateExpired,
    MandateRevoked,
}

impl WebhookEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MandateCreated => "MandateCreated",
            Self::MandateVerificationFailed => "MandateVerificationFailed",
            Self::MandateExpired => "MandateExpired",
            Self::MandateRevoked => "MandateRevoked",
        }
    }
}

impl fmt::Display for WebhookEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The central entity: a verified (or rejected-but-audited) delegated
/// payment authorization. See `spec.md` §3 for the full invariant set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub protocol: ProtocolTag,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub scope: Value,
    pub amount_limit: Option<Amount>,
    pub currency: Option<Currency>,
    pub expires_at: DateTime<Utc>,
    pub status: AuthorizationStatus,
    pub raw_payload: Value,
    pub verification_status: String,
    pub verification_reason: Option<String>,
    pub verification_details: Value,
    pub verified_at: Option<DateTime<Utc>>,
    pub retention_days: i32,
    pub soft_delete_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Authorization {
    /// Effective status reflecting expiry regardless of the stored
    /// value, per the invariant `expires_at <= now => EXPIRED`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> AuthorizationStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        if self.expires_at <= now {
            AuthorizationStatus::Expired
        } else {
            self.status
        }
    }

    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        match self.soft_delete_at {
            Some(deleted_at) => now > deleted_at + chrono::Duration::days(self.retention_days as i64),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_tag_roundtrips() {
        assert_eq!(ProtocolTag::parse("jwt-vc").unwrap(), ProtocolTag::JwtVc);
        assert_eq!(
            ProtocolTag::parse("DelegatedToken").unwrap(),
            ProtocolTag::DelegatedToken
        );
        assert!(ProtocolTag::parse("bogus").is_err());
    }

    #[test]
    fn revoked_and_deleted_are_terminal() {
        assert!(AuthorizationStatus::Revoked.is_terminal());
        assert!(AuthorizationStatus::Deleted.is_terminal());
        assert!(!AuthorizationStatus::Valid.is_terminal());
    }
}
