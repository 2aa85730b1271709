//! Audit trail access and the timeline projection
//!
//! Entries are append-only: this module can add and read them, never change
//! or remove them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use esign_types::{
    verify_chain, AuditDraft, AuditEvent, AuditLogEntry, Result, SignatureDocument, SigningError,
};
use serde::Serialize;

use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn DocumentStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, document_id: &str, draft: AuditDraft) -> Result<AuditLogEntry> {
        let mut linked = self.store.append_audit(document_id, vec![draft]).await?;
        linked
            .pop()
            .ok_or_else(|| SigningError::storage("audit append returned no entry"))
    }

    /// Every entry for the document in chain order
    pub async fn entries(&self, document_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.store.audit_entries(document_id).await
    }

    /// Re-derive the chain; `Integrity` on the first broken link
    pub async fn verify(&self, document_id: &str) -> Result<usize> {
        let entries = self.entries(document_id).await?;
        verify_chain(&entries).map_err(SigningError::Integrity)?;
        Ok(entries.len())
    }
}

/// One row of the human-facing timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    pub at: DateTime<Utc>,
    pub event: AuditEvent,
    pub label: String,
    pub actor: Option<String>,
    pub email: Option<String>,
    pub detail: Option<String>,
}

impl TimelineEntry {
    fn new(at: DateTime<Utc>, event: AuditEvent) -> Self {
        Self {
            at,
            event,
            label: event.label().to_string(),
            actor: None,
            email: None,
            detail: None,
        }
    }
}

/// Chronological lifecycle view built from the document and its entries.
///
/// Recipient milestones come from the document itself; expiration and
/// certificate issuance only exist in the audit log.
pub fn timeline(document: &SignatureDocument, entries: &[AuditLogEntry]) -> Vec<TimelineEntry> {
    let mut rows = vec![TimelineEntry::new(
        document.created_at,
        AuditEvent::DocumentCreated,
    )];

    if let Some(at) = document.sent_at {
        let mut row = TimelineEntry::new(at, AuditEvent::DocumentSent);
        row.detail = Some(format!("{} recipients", document.recipients.len()));
        rows.push(row);
    }

    for recipient in &document.recipients {
        let milestones = [
            (recipient.viewed_at, AuditEvent::DocumentViewed),
            (recipient.signed_at, AuditEvent::DocumentSigned),
            (recipient.declined_at, AuditEvent::DocumentDeclined),
        ];
        for (at, event) in milestones {
            let Some(at) = at else { continue };
            let mut row = TimelineEntry::new(at, event);
            row.actor = Some(recipient.name.clone());
            row.email = Some(recipient.email.clone());
            if event == AuditEvent::DocumentDeclined {
                row.detail = recipient.decline_reason.clone();
            } else if event == AuditEvent::DocumentSigned {
                row.detail = recipient.ip_address.clone();
            }
            rows.push(row);
        }
    }

    if let Some(at) = document.completed_at {
        rows.push(TimelineEntry::new(at, AuditEvent::DocumentCompleted));
    }

    for entry in entries {
        if matches!(
            entry.event,
            AuditEvent::DocumentExpired | AuditEvent::CertificateGenerated
        ) {
            let mut row = TimelineEntry::new(entry.timestamp, entry.event);
            row.detail = entry.metadata.get("certificate_id").cloned();
            rows.push(row);
        }
    }

    // Stable: ties keep lifecycle order
    rows.sort_by_key(|row| row.at);
    rows
}
