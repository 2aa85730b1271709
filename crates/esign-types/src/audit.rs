//! Tamper-evident audit log for document events

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    DocumentCreated,
    DocumentSent,
    DocumentViewed,
    DocumentSigned,
    DocumentDeclined,
    DocumentCompleted,
    CertificateGenerated,
    CertificateDownloaded,
    DocumentEncrypted,
    PasswordStored,
    PasswordRevealed,
    SignatureEncrypted,
    /// A signing attempt failed validation; no state changed
    SignatureRejected,
    DocumentExpired,
    DocumentRendered,
    IntegrityCheckFailed,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::DocumentCreated => "document_created",
            AuditEvent::DocumentSent => "document_sent",
            AuditEvent::DocumentViewed => "document_viewed",
            AuditEvent::DocumentSigned => "document_signed",
            AuditEvent::DocumentDeclined => "document_declined",
            AuditEvent::DocumentCompleted => "document_completed",
            AuditEvent::CertificateGenerated => "certificate_generated",
            AuditEvent::CertificateDownloaded => "certificate_downloaded",
            AuditEvent::DocumentEncrypted => "document_encrypted",
            AuditEvent::PasswordStored => "password_stored",
            AuditEvent::PasswordRevealed => "password_revealed",
            AuditEvent::SignatureEncrypted => "signature_encrypted",
            AuditEvent::SignatureRejected => "signature_rejected",
            AuditEvent::DocumentExpired => "document_expired",
            AuditEvent::DocumentRendered => "document_rendered",
            AuditEvent::IntegrityCheckFailed => "integrity_check_failed",
        }
    }

    /// Human-readable label for certificates and timelines
    pub fn label(self) -> &'static str {
        match self {
            AuditEvent::DocumentCreated => "Document created",
            AuditEvent::DocumentSent => "Sent for signature",
            AuditEvent::DocumentViewed => "Viewed",
            AuditEvent::DocumentSigned => "Signed",
            AuditEvent::DocumentDeclined => "Declined",
            AuditEvent::DocumentCompleted => "Completed",
            AuditEvent::CertificateGenerated => "Certificate generated",
            AuditEvent::CertificateDownloaded => "Certificate downloaded",
            AuditEvent::DocumentEncrypted => "Document encrypted",
            AuditEvent::PasswordStored => "Password stored",
            AuditEvent::PasswordRevealed => "Password revealed",
            AuditEvent::SignatureEncrypted => "Signature encrypted",
            AuditEvent::SignatureRejected => "Signature rejected",
            AuditEvent::DocumentExpired => "Expired",
            AuditEvent::DocumentRendered => "Final document rendered",
            AuditEvent::IntegrityCheckFailed => "Integrity check failed",
        }
    }
}

impl std::str::FromStr for AuditEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown audit event: {}", s))
    }
}

/// An entry not yet linked into a document's chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    pub event: AuditEvent,
    pub at: Option<DateTime<Utc>>,
    pub recipient_email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl AuditDraft {
    pub fn new(event: AuditEvent) -> Self {
        Self {
            event,
            at: None,
            recipient_email: None,
            ip_address: None,
            user_agent: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Pin the entry to the timestamp of the transition it records
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    pub fn recipient(mut self, email: &str) -> Self {
        self.recipient_email = Some(email.to_string());
        self
    }

    pub fn client(mut self, ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_string);
        self.user_agent = user_agent.map(str::to_string);
        self
    }

    pub fn meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Link this draft after `previous` in the chain of `document_id`.
    ///
    /// Timestamps never go backwards within a chain.
    pub fn link(self, document_id: &str, previous: Option<&AuditLogEntry>) -> AuditLogEntry {
        let mut timestamp = self.at.unwrap_or_else(Utc::now);
        if let Some(prev) = previous {
            if timestamp < prev.timestamp {
                timestamp = prev.timestamp;
            }
        }

        let mut entry = AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            sequence: previous.map(|p| p.sequence + 1).unwrap_or(0),
            event: self.event,
            timestamp,
            recipient_email: self.recipient_email,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            metadata: self.metadata,
            previous_hash: previous.map(|p| p.entry_hash.clone()),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub document_id: String,
    pub sequence: u64,
    pub event: AuditEvent,
    pub timestamp: DateTime<Utc>,
    pub recipient_email: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub previous_hash: Option<String>,
    pub entry_hash: String,
}

impl AuditLogEntry {
    /// Compute the hash of this entry (for chain linking)
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.document_id.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.event.as_str().as_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        for part in [&self.recipient_email, &self.ip_address, &self.user_agent] {
            hasher.update([0u8]);
            if let Some(value) = part {
                hasher.update(value.as_bytes());
            }
        }
        for (key, value) in &self.metadata {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        if let Some(ref prev) = self.previous_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// One-line summary for display
    pub fn summary(&self) -> String {
        format!(
            "[{}] {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.recipient_email.as_deref().unwrap_or("system"),
            self.event.label()
        )
    }
}

/// Verify the integrity of a document's chain (entries in sequence order)
pub fn verify_chain(entries: &[AuditLogEntry]) -> Result<(), String> {
    let mut expected_prev: Option<&str> = None;

    for (i, entry) in entries.iter().enumerate() {
        if entry.sequence != i as u64 {
            return Err(format!(
                "Chain broken at entry {}: sequence {} out of place",
                i, entry.sequence
            ));
        }
        if entry.previous_hash.as_deref() != expected_prev {
            return Err(format!(
                "Chain broken at entry {}: expected prev {:?}, got {:?}",
                i, expected_prev, entry.previous_hash
            ));
        }
        if entry.compute_hash() != entry.entry_hash {
            return Err(format!("Entry {} was modified after it was recorded", i));
        }
        expected_prev = Some(&entry.entry_hash);
    }

    Ok(())
}

/// Compute SHA-256 hash of document bytes
pub fn hash_document(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(events: &[AuditEvent]) -> Vec<AuditLogEntry> {
        let mut entries: Vec<AuditLogEntry> = Vec::new();
        for event in events {
            let entry = AuditDraft::new(*event)
                .recipient("alice@example.com")
                .link("doc-123", entries.last());
            entries.push(entry);
        }
        entries
    }

    #[test]
    fn test_chain_integrity() {
        let entries = chain(&[
            AuditEvent::DocumentCreated,
            AuditEvent::DocumentSent,
            AuditEvent::DocumentSigned,
        ]);

        assert!(verify_chain(&entries).is_ok());
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].sequence, 2);
        assert!(entries[0].previous_hash.is_none());
    }

    #[test]
    fn test_chain_tamper_detection() {
        let mut entries = chain(&[AuditEvent::DocumentCreated, AuditEvent::DocumentSigned]);

        // Tamper with the first entry
        entries[0].recipient_email = Some("mallory@example.com".to_string());

        assert!(verify_chain(&entries).is_err());
    }

    #[test]
    fn test_metadata_is_covered_by_hash() {
        let mut entries = chain(&[AuditEvent::DocumentDeclined]);
        entries[0]
            .metadata
            .insert("reason".to_string(), "forged".to_string());

        assert!(verify_chain(&entries).is_err());
    }

    #[test]
    fn test_timestamps_never_go_backwards() {
        let first = AuditDraft::new(AuditEvent::DocumentSent).link("doc", None);
        let earlier = first.timestamp - chrono::Duration::seconds(30);
        let second = AuditDraft::new(AuditEvent::DocumentViewed)
            .at(earlier)
            .link("doc", Some(&first));

        assert_eq!(second.timestamp, first.timestamp);
    }

    #[test]
    fn test_event_parses_from_str() {
        let parsed: AuditEvent = "certificate_generated".parse().unwrap();
        assert_eq!(parsed, AuditEvent::CertificateGenerated);
        assert!("nonsense".parse::<AuditEvent>().is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn event_strategy() -> impl Strategy<Value = AuditEvent> {
        prop_oneof![
            Just(AuditEvent::DocumentViewed),
            Just(AuditEvent::DocumentSigned),
            Just(AuditEvent::DocumentDeclined),
            Just(AuditEvent::SignatureEncrypted),
            Just(AuditEvent::CertificateGenerated),
        ]
    }

    proptest! {
        /// Property: Any sequence of appends maintains chain integrity
        #[test]
        fn append_preserves_integrity(events in prop::collection::vec(event_strategy(), 1..20)) {
            let mut entries: Vec<AuditLogEntry> = Vec::new();
            for (i, event) in events.iter().enumerate() {
                let entry = AuditDraft::new(*event)
                    .recipient(&format!("user{}@test.com", i))
                    .meta("index", i)
                    .link("prop-doc", entries.last());
                entries.push(entry);
            }

            prop_assert!(verify_chain(&entries).is_ok());
            prop_assert_eq!(entries.len(), events.len());
        }

        /// Property: Tampering with any entry breaks verification
        #[test]
        fn tampering_detected(count in 2usize..8, tamper_index in 0usize..8) {
            let tamper_index = tamper_index % count;
            let mut entries: Vec<AuditLogEntry> = Vec::new();
            for i in 0..count {
                let entry = AuditDraft::new(AuditEvent::DocumentViewed)
                    .recipient(&format!("user{}@test.com", i))
                    .link("prop-doc", entries.last());
                entries.push(entry);
            }

            entries[tamper_index].user_agent = Some("tampered".to_string());
            prop_assert!(verify_chain(&entries).is_err());
        }

        /// Property: JSON serialization roundtrip keeps the chain verifiable
        #[test]
        fn json_roundtrip(count in 1usize..10) {
            let mut entries: Vec<AuditLogEntry> = Vec::new();
            for i in 0..count {
                let entry = AuditDraft::new(AuditEvent::DocumentSigned)
                    .client(Some("203.0.113.7"), Some("Mozilla/5.0"))
                    .meta("field_count", i)
                    .link("roundtrip", entries.last());
                entries.push(entry);
            }

            let json = serde_json::to_string(&entries).unwrap();
            let restored: Vec<AuditLogEntry> = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(&entries, &restored);
            prop_assert!(verify_chain(&restored).is_ok());
        }

        /// Property: Document hash function is deterministic
        #[test]
        fn hash_document_deterministic(data in prop::collection::vec(any::<u8>(), 0..1024)) {
            let hash1 = hash_document(&data);
            let hash2 = hash_document(&data);
            prop_assert_eq!(&hash1, &hash2);
            prop_assert_eq!(hash1.len(), 64); // SHA-256 hex is 64 chars
        }
    }
}
