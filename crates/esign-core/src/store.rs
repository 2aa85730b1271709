//! Persistence seams consumed by the signing service
//!
//! The document aggregate (document, recipients, fields) is persisted as one
//! unit together with the audit entries its transition produced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use esign_types::{AuditDraft, AuditLogEntry, Result, SignatureDocument, StorageRef};
use serde::{Deserialize, Serialize};

/// Resolves storage references to bytes
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn fetch(&self, reference: &StorageRef) -> Result<Vec<u8>>;

    /// Store bytes under `key`, replacing any previous content
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StorageRef>;
}

/// Issued completion certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub certificate_id: String,
    pub document_id: String,
    /// SHA-256 of the final document when the certificate was issued
    pub document_hash: String,
    pub completed_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, document_id: &str) -> Result<SignatureDocument>;

    async fn find_by_recipient(&self, recipient_id: &str) -> Result<SignatureDocument>;

    /// Persist the aggregate and link `drafts` into its audit chain, atomically.
    ///
    /// Returns the linked entries. On error neither the document nor the
    /// audit log changed.
    async fn commit(
        &self,
        document: &SignatureDocument,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>>;

    /// Audit entries that accompany no state change
    async fn append_audit(
        &self,
        document_id: &str,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>>;

    /// All entries for a document in chain order
    async fn audit_entries(&self, document_id: &str) -> Result<Vec<AuditLogEntry>>;

    /// Store the record unless the document already has one.
    ///
    /// Returns the stored record and whether this call created it.
    async fn insert_certificate_if_absent(
        &self,
        record: CertificateRecord,
    ) -> Result<(CertificateRecord, bool)>;

    async fn load_certificate(&self, certificate_id: &str) -> Result<Option<CertificateRecord>>;

    async fn certificate_for_document(&self, document_id: &str)
        -> Result<Option<CertificateRecord>>;
}

/// Link drafts after the current chain head
pub fn link_drafts(
    document_id: &str,
    head: Option<&AuditLogEntry>,
    drafts: Vec<AuditDraft>,
) -> Vec<AuditLogEntry> {
    let mut linked: Vec<AuditLogEntry> = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let previous = linked.last().or(head);
        let entry = draft.link(document_id, previous);
        linked.push(entry);
    }
    linked
}
