//! Protocol Verifiers (C2): pluggable validators behind the shared
//! `vault_core::Verifier` capability, per `spec.md` §9's "polymorphic
//! verifiers without runtime dispatch gymnastics" design note.
//!
//! Grounded on `spec.md` §4.2.1/§4.2.2 exactly, cross-checked against
//! `original_source/app/utils/jwt_verification.py` and
//! `app/protocols/acp/schemas.py`.

pub mod delegated_token;
pub mod jwt_vc;

pub use delegated_token::DelegatedTokenVerifier;
pub use jwt_vc::JwtVcVerifier;

use vault_core::{VerificationResult, VerificationStatus};

pub(crate) fn invalid_format(reason: impl Into<String>) -> VerificationResult {
    VerificationResult {
        status: Some(VerificationStatus::InvalidFormat),
        reason: reason.into(),
        ..Default::default()
    }
}

pub(crate) fn missing_field(fields: impl Into<String>) -> VerificationResult {
    let fields = fields.into();
    VerificationResult {
        status: Some(VerificationStatus::MissingRequiredField),
        reason: format!("missing required field(s): {fields}"),
        ..Default::default()
    }
}
