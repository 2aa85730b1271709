//! Completion certificate: identity, content assembly and verification result

use chrono::{DateTime, SecondsFormat, Utc};
use esign_crypto::keys::sha256;
use esign_pdf::{CertificateContent, CertificateSigner};
use esign_types::{AuditLogEntry, SignatureDocument};
use serde::Serialize;

use crate::store::CertificateRecord;

const ID_PREFIX: &str = "CERT-";
/// Digest bytes kept in the id (24 hex chars)
const ID_BYTES: usize = 12;

/// Deterministic id for a document's completion
pub fn certificate_id(document_id: &str, completed_at: DateTime<Utc>) -> String {
    let input = format!(
        "{}|{}",
        document_id,
        completed_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
    );
    let digest = sha256(input.as_bytes());
    format!("{}{}", ID_PREFIX, hex::encode_upper(&digest[..ID_BYTES]))
}

/// An issued certificate with its rendered PDF
#[derive(Debug, Clone)]
pub struct Certificate {
    pub record: CertificateRecord,
    pub pdf: Vec<u8>,
    /// This call issued the record
    pub created: bool,
}

/// Outcome of checking a certificate against the stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub certificate_id: String,
    pub verified: bool,
    pub document_id: Option<String>,
    pub document_hash: Option<String>,
    pub reason: Option<String>,
}

impl Verification {
    pub fn verified(record: &CertificateRecord) -> Self {
        Self {
            certificate_id: record.certificate_id.clone(),
            verified: true,
            document_id: Some(record.document_id.clone()),
            document_hash: Some(record.document_hash.clone()),
            reason: None,
        }
    }

    pub fn failed(certificate_id: &str, record: Option<&CertificateRecord>, reason: impl Into<String>) -> Self {
        Self {
            certificate_id: certificate_id.to_string(),
            verified: false,
            document_id: record.map(|r| r.document_id.clone()),
            document_hash: record.map(|r| r.document_hash.clone()),
            reason: Some(reason.into()),
        }
    }
}

/// Assemble what the certificate PDF shows
pub fn build_content(
    organization: &str,
    record: &CertificateRecord,
    document: &SignatureDocument,
    entries: &[AuditLogEntry],
    excerpt: usize,
) -> CertificateContent {
    let signers = document
        .recipients
        .iter()
        .map(|r| CertificateSigner {
            name: r.name.clone(),
            email: r.email.clone(),
            role: r.role.to_string(),
            status: r.status.to_string(),
            viewed_at: r.viewed_at,
            signed_at: r.signed_at,
            ip_address: r.ip_address.clone(),
            user_agent: r.user_agent.clone(),
        })
        .collect();

    let skip = entries.len().saturating_sub(excerpt);
    let audit_excerpt = entries[skip..].iter().map(AuditLogEntry::summary).collect();

    CertificateContent {
        organization: organization.to_string(),
        certificate_id: record.certificate_id.clone(),
        document_id: document.id.clone(),
        document_title: document.title.clone(),
        completed_at: record.completed_at,
        generated_at: record.generated_at,
        document_hash: record.document_hash.clone(),
        signers,
        audit_excerpt,
        audit_total: entries.len(),
    }
}
