//! Verification Dispatcher (C3): routes an envelope `{protocol,
//! payload}` to the matching protocol verifier, per `spec.md` §4.3.
//!
//! Grounded on
//! `original_source/app/services/verification_dispatcher.py`'s
//! protocol-tag routing and `vc_jwt` envelope-lifting, generalized from
//! the original's `AP2`/`ACP` naming onto `vault_core::ProtocolTag`.

use std::collections::HashMap;

use serde_json::Value;
use vault_core::{ProtocolTag, VerificationResult, Verifier};

use crate::verifiers::missing_field;

pub struct Dispatcher {
    verifiers: HashMap<ProtocolTag, Box<dyn Verifier>>,
}

impl Dispatcher {
    pub fn new(verifiers: Vec<Box<dyn Verifier>>) -> Self {
        let verifiers = verifiers.into_iter().map(|v| (v.protocol(), v)).collect();
        Self { verifiers }
    }

    /// `Verify(payload, protocol)`. For `JWT-VC`, lifts `vc_jwt` out of
    /// the envelope before handing it to the verifier; other protocols
    /// receive the envelope payload verbatim.
    pub async fn verify(
        &self,
        protocol: ProtocolTag,
        payload: &Value,
        expected_scope: Option<&Value>,
    ) -> VerificationResult {
        let Some(verifier) = self.verifiers.get(&protocol) else {
            return crate::verifiers::invalid_format(format!("unsupported protocol: {protocol}"));
        };

        match protocol {
            ProtocolTag::JwtVc => match payload.get("vc_jwt") {
                Some(token) => verifier.verify(token, expected_scope).await,
                None => missing_field("vc_jwt"),
            },
            ProtocolTag::DelegatedToken => verifier.verify(payload, expected_scope).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_core::VerificationStatus;

    struct StubVerifier(ProtocolTag, VerificationStatus);

    #[async_trait::async_trait]
    impl Verifier for StubVerifier {
        fn protocol(&self) -> ProtocolTag {
            self.0
        }

        async fn verify(&self, _: &Value, _: Option<&Value>) -> VerificationResult {
            VerificationResult {
                status: Some(self.1),
                ..Default::default()
            }
        }
    }

    #[tokio::test]
    async fn unknown_protocol_is_invalid_format() {
        let dispatcher = Dispatcher::new(vec![]);
        let result = dispatcher
            .verify(ProtocolTag::JwtVc, &serde_json::json!({}), None)
            .await;
        assert_eq!(result.status, Some(VerificationStatus::InvalidFormat));
    }

    #[tokio::test]
    async fn jwt_vc_requires_vc_jwt_field() {
        let dispatcher = Dispatcher::new(vec![Box::new(StubVerifier(
            ProtocolTag::JwtVc,
            VerificationStatus::Valid,
        ))]);
        let result = dispatcher
            .verify(ProtocolTag::JwtVc, &serde_json::json!({}), None)
            .await;
        assert_eq!(result.status, Some(VerificationStatus::MissingRequiredField));
    }

    #[tokio::test]
    async fn jwt_vc_lifts_vc_jwt_field() {
        let dispatcher = Dispatcher::new(vec![Box::new(StubVerifier(
            ProtocolTag::JwtVc,
            VerificationStatus::Valid,
        ))]);
        let result = dispatcher
            .verify(ProtocolTag::JwtVc, &serde_json::json!({"vc_jwt": "a.b.c"}), None)
            .await;
        assert_eq!(result.status, Some(VerificationStatus::Valid));
    }
}
