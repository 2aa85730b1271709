//! Multi-party signing workflow
//!
//! Ties the model, crypto and PDF crates together: the signing state
//! machine with order enforcement, the audit trail, completion
//! certificates, finalization of completed documents and the service
//! facade that callers drive.

pub mod audit_trail;
pub mod certificate;
mod completion;
pub mod config;
pub mod events;
pub mod memory;
pub mod notify;
pub mod service;
pub mod state_machine;
pub mod store;

pub use audit_trail::{timeline, AuditTrail, TimelineEntry};
pub use certificate::{certificate_id, Certificate, Verification};
pub use config::EsignConfig;
pub use events::{CompletionWorker, EventBus, NotificationRelay, SigningEvent};
pub use memory::{MemoryFileStore, MemoryStore};
pub use notify::{CollectingNotifier, LogNotifier, NotificationEvent, Notifier};
pub use service::{IntegrityReport, ServiceSettings, SigningService};
pub use state_machine::{hash_access_code, mask_email, ClientContext, SignatureSubmission};
pub use store::{CertificateRecord, DocumentStore, FileStore};
