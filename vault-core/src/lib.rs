//! Protocol-agnostic domain types for the authorization credential vault.
//!
//! No I/O lives in this crate: amount/currency primitives, the core
//! `Authorization` entity, audit event kinds, and the uniform
//! verification result shape shared by every protocol verifier.

pub mod amount;
pub mod domain;
pub mod error;
pub mod verification;

pub use amount::{Amount, Currency, RECOGNIZED_CURRENCIES};
pub use domain::{
    AuditEventKind, Authorization, AuthorizationStatus, ProtocolTag, WebhookEventKind,
};
pub use error::{Result, VaultError};
pub use verification::{VerificationResult, VerificationStatus, Verifier};
