//! Evidence Pack Builder (C10), per `spec.md` §4.10.
//!
//! Grounded on the `zip` crate's `ZipWriter`/`FileOptions` API (pulled
//! in for this module specifically — see DESIGN.md's "Added
//! dependencies" note) and the archive-content list enumerated in the
//! spec verbatim: `credential.<ext>`, `verification.json`,
//! `audit.json`, `summary.txt`.

use std::io::{Cursor, Write};

use chrono::Utc;
use uuid::Uuid;
use vault_core::AuditEventKind;
use vault_store::Database;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::audit::AuditLog;
use crate::error::{GatewayError, Result};

pub struct EvidencePackBuilder {
    db: std::sync::Arc<Database>,
    audit: std::sync::Arc<AuditLog>,
}

impl EvidencePackBuilder {
    pub fn new(db: std::sync::Arc<Database>, audit: std::sync::Arc<AuditLog>) -> Self {
        Self { db, audit }
    }

    /// `BuildPack(authorization_id) -> (archive_bytes, filename)`.
    pub async fn build(&self, tenant_id: Uuid, authorization_id: Uuid) -> Result<(Vec<u8>, String)> {
        let row = self
            .db
            .get_authorization(tenant_id, authorization_id, true)
            .await?
            .ok_or_else(|| {
                GatewayError::NotFound(format!("authorization {authorization_id} not found"))
            })?;
        let authorization = row.into_domain()?;

        let audit_events = self.audit.list_events(authorization_id).await?;

        let credential_ext = match authorization.protocol {
            vault_core::ProtocolTag::JwtVc => "txt",
            vault_core::ProtocolTag::DelegatedToken => "json",
        };
        let credential_bytes = match authorization.protocol {
            vault_core::ProtocolTag::JwtVc => authorization
                .raw_payload
                .get("vc_jwt")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .as_bytes()
                .to_vec(),
            vault_core::ProtocolTag::DelegatedToken => {
                serde_json::to_vec_pretty(&authorization.raw_payload)
                    .map_err(|e| GatewayError::Internal(e.into()))?
            }
        };

        let verification_json = serde_json::to_vec_pretty(&serde_json::json!({
            "status": authorization.verification_status,
            "reason": authorization.verification_reason,
            "details": authorization.verification_details,
            "verified_at": authorization.verified_at,
        }))
        .map_err(|e| GatewayError::Internal(e.into()))?;

        let audit_json = serde_json::to_vec_pretty(&audit_events)
            .map_err(|e| GatewayError::Internal(e.into()))?;

        let summary = format!(
            "Authorization {id}\nProtocol: {protocol}\nIssuer: {issuer}\nSubject: {subject}\nAmount limit: {amount} {currency}\nExpires at: {expires_at}\nCurrent status: {status}\n",
            id = authorization.id,
            protocol = authorization.protocol,
            issuer = authorization.issuer.as_deref().unwrap_or("-"),
            subject = authorization.subject.as_deref().unwrap_or("-"),
            amount = authorization
                .amount_limit
                .map(|a| a.to_string())
                .unwrap_or_else(|| "-".to_string()),
            currency = authorization
                .currency
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            expires_at = authorization.expires_at,
            status = authorization.effective_status(Utc::now()),
        );

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

            zip.start_file(format!("credential.{credential_ext}"), options)
                .map_err(|e| GatewayError::Internal(e.into()))?;
            zip.write_all(&credential_bytes)
                .map_err(|e| GatewayError::Internal(e.into()))?;

            zip.start_file("verification.json", options)
                .map_err(|e| GatewayError::Internal(e.into()))?;
            zip.write_all(&verification_json)
                .map_err(|e| GatewayError::Internal(e.into()))?;

            zip.start_file("audit.json", options)
                .map_err(|e| GatewayError::Internal(e.into()))?;
            zip.write_all(&audit_json)
                .map_err(|e| GatewayError::Internal(e.into()))?;

            zip.start_file("summary.txt", options)
                .map_err(|e| GatewayError::Internal(e.into()))?;
            zip.write_all(summary.as_bytes())
                .map_err(|e| GatewayError::Internal(e.into()))?;

            zip.finish().map_err(|e| GatewayError::Internal(e.into()))?;
        }

        self.audit
            .log_event(Some(authorization_id), AuditEventKind::Exported, serde_json::json!({}))
            .await?;

        let filename = format!(
            "evidence-{}-{}.zip",
            authorization_id,
            Utc::now().format("%Y%m%d%H%M%S")
        );

        Ok((cursor.into_inner(), filename))
    }
}
