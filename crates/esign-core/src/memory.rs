//! In-memory stores for tests and single-process deployments

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use esign_types::{
    AuditDraft, AuditLogEntry, Result, SignatureDocument, SigningError, StorageRef, StorageType,
};
use tokio::sync::RwLock;

use crate::store::{link_drafts, CertificateRecord, DocumentStore, FileStore};

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, SignatureDocument>,
    audit: HashMap<String, Vec<AuditLogEntry>>,
    certificates: HashMap<String, CertificateRecord>,
}

/// Document store holding everything behind one lock
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail without applying anything
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Rewrite a stored audit entry in place, bypassing the chain
    pub async fn tamper_audit_entry(&self, document_id: &str, sequence: usize, f: impl FnOnce(&mut AuditLogEntry)) {
        let mut state = self.state.write().await;
        if let Some(entry) = state
            .audit
            .get_mut(document_id)
            .and_then(|entries| entries.get_mut(sequence))
        {
            f(entry);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, document_id: &str) -> Result<SignatureDocument> {
        self.state
            .read()
            .await
            .documents
            .get(document_id)
            .cloned()
            .ok_or_else(|| SigningError::not_found(format!("document {}", document_id)))
    }

    async fn find_by_recipient(&self, recipient_id: &str) -> Result<SignatureDocument> {
        self.state
            .read()
            .await
            .documents
            .values()
            .find(|d| d.recipients.iter().any(|r| r.id == recipient_id))
            .cloned()
            .ok_or_else(|| SigningError::not_found(format!("recipient {}", recipient_id)))
    }

    async fn commit(
        &self,
        document: &SignatureDocument,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut state = self.state.write().await;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(SigningError::storage("injected commit failure"));
        }

        let chain = state.audit.entry(document.id.clone()).or_default();
        let linked = link_drafts(&document.id, chain.last(), drafts);
        chain.extend(linked.iter().cloned());
        state.documents.insert(document.id.clone(), document.clone());
        Ok(linked)
    }

    async fn append_audit(
        &self,
        document_id: &str,
        drafts: Vec<AuditDraft>,
    ) -> Result<Vec<AuditLogEntry>> {
        let mut state = self.state.write().await;
        if !state.documents.contains_key(document_id) {
            return Err(SigningError::not_found(format!("document {}", document_id)));
        }
        let chain = state.audit.entry(document_id.to_string()).or_default();
        let linked = link_drafts(document_id, chain.last(), drafts);
        chain.extend(linked.iter().cloned());
        Ok(linked)
    }

    async fn audit_entries(&self, document_id: &str) -> Result<Vec<AuditLogEntry>> {
        Ok(self
            .state
            .read()
            .await
            .audit
            .get(document_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_certificate_if_absent(
        &self,
        record: CertificateRecord,
    ) -> Result<(CertificateRecord, bool)> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .certificates
            .values()
            .find(|c| c.document_id == record.document_id)
        {
            return Ok((existing.clone(), false));
        }
        state
            .certificates
            .insert(record.certificate_id.clone(), record.clone());
        Ok((record, true))
    }

    async fn load_certificate(&self, certificate_id: &str) -> Result<Option<CertificateRecord>> {
        Ok(self
            .state
            .read()
            .await
            .certificates
            .get(certificate_id)
            .cloned())
    }

    async fn certificate_for_document(
        &self,
        document_id: &str,
    ) -> Result<Option<CertificateRecord>> {
        Ok(self
            .state
            .read()
            .await
            .certificates
            .values()
            .find(|c| c.document_id == document_id)
            .cloned())
    }
}

/// File store backed by a map
#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn remove(&self, key: &str) {
        self.files.write().await.remove(key);
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.files.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn fetch(&self, reference: &StorageRef) -> Result<Vec<u8>> {
        self.files
            .read()
            .await
            .get(&reference.key)
            .cloned()
            .ok_or_else(|| SigningError::not_found(format!("file {}", reference)))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StorageRef> {
        self.files.write().await.insert(key.to_string(), bytes);
        Ok(StorageRef::new(StorageType::Memory, key))
    }
}
