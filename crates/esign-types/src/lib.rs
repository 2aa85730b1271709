//! Shared model for the e-signature workflow
//!
//! Documents, recipients, fields, typed metadata, the hash-chained audit
//! entry and the error taxonomy used by every other crate.

pub mod audit;
pub mod document;
pub mod error;
pub mod metadata;

pub use audit::{hash_document, verify_chain, AuditDraft, AuditEvent, AuditLogEntry};
pub use document::{
    DocumentStatus, Field, FieldType, NewDocument, NewField, NewRecipient, Recipient,
    RecipientRole, RecipientStatus, SignatureDocument, SignatureImageRef, StorageRef, StorageType,
};
pub use error::{Result, SigningError};
pub use metadata::{BusinessFlags, DocumentMetadata, EncryptionMetadata};
