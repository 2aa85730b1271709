//! Signing service
//!
//! Async facade over the state machine. Each operation loads the document
//! under a per-document lock, applies a pure transition, commits the new
//! state with its audit entries in one store call, and publishes events
//! after the commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use esign_crypto::EncryptionService;
use esign_pdf::{render_certificate, PdfDocument, RenderOptions};
use esign_types::{
    AuditDraft, AuditEvent, AuditLogEntry, DocumentStatus, NewDocument, Result,
    SignatureDocument, SignatureImageRef, SigningError,
};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::audit_trail::{timeline, AuditTrail, TimelineEntry};
use crate::certificate::{build_content, certificate_id, Certificate, Verification};
use crate::completion::Finalizer;
use crate::config::EsignConfig;
use crate::events::{EventBus, SigningEvent};
use crate::state_machine::{
    self, check_access_code, recipient_position, ClientContext, SignatureSubmission,
};
use crate::store::{CertificateRecord, DocumentStore, FileStore};

/// Tunables the service reads; crypto keys are injected separately
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub organization: String,
    pub render_timeout: Duration,
    pub render: RenderOptions,
    pub audit_excerpt: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from_config(&EsignConfig::default())
    }
}

impl ServiceSettings {
    pub fn from_config(config: &EsignConfig) -> Self {
        Self {
            organization: config.organization.name.clone(),
            render_timeout: config.render_timeout(),
            render: RenderOptions {
                text_cap_pt: config.rendering.text_cap_pt,
                certificate_strip: config.rendering.certificate_strip,
                certificate_id: None,
            },
            audit_excerpt: config.certificate.audit_excerpt,
        }
    }
}

/// Result of checking a stored artifact and its audit chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub document_id: String,
    pub sealed_checksum: String,
    pub content_hash: String,
    pub audit_entries: usize,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    files: Arc<dyn FileStore>,
    crypto: EncryptionService,
    bus: EventBus,
    settings: ServiceSettings,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

#[derive(Clone)]
pub struct SigningService {
    inner: Arc<Inner>,
}

impl SigningService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        files: Arc<dyn FileStore>,
        crypto: EncryptionService,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                files,
                crypto,
                bus: EventBus::new(),
                settings,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.inner.store.clone()
    }

    pub fn audit(&self) -> AuditTrail {
        AuditTrail::new(self.inner.store.clone())
    }

    /// Serialize work on one document
    async fn lock(&self, document_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .inner
                .locks
                .lock()
                .map_err(|_| SigningError::storage("document lock table poisoned"))?;
            locks
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    fn finalizer(&self) -> Finalizer<'_> {
        Finalizer {
            files: self.inner.files.as_ref(),
            crypto: &self.inner.crypto,
            render: &self.inner.settings.render,
            timeout: self.inner.settings.render_timeout,
        }
    }

    /// Lazily expire an overdue document. Commits the expiration and then
    /// fails the calling operation.
    async fn check_expiry(&self, document: &mut SignatureDocument) -> Result<()> {
        let Some(draft) = state_machine::expire_if_due(document, Utc::now()) else {
            return Ok(());
        };
        self.inner.store.commit(document, vec![draft]).await?;
        info!(document_id = %document.id, "Document expired");
        self.inner.bus.publish(SigningEvent::DocumentExpired {
            document_id: document.id.clone(),
        });
        Err(SigningError::invalid_state("document expired"))
    }

    /// Current state of a document. Overdue documents are expired first.
    pub async fn document(&self, document_id: &str) -> Result<SignatureDocument> {
        let _guard = self.lock(document_id).await?;
        let mut document = self.inner.store.load(document_id).await?;
        match self.check_expiry(&mut document).await {
            Ok(()) | Err(SigningError::InvalidState(_)) => Ok(document),
            Err(e) => Err(e),
        }
    }

    pub async fn create_document(&self, new: NewDocument) -> Result<SignatureDocument> {
        let source = self.inner.files.fetch(&new.source).await?;
        let page_count = PdfDocument::from_bytes(&source)
            .map_err(|e| SigningError::validation(format!("source is not a readable PDF: {}", e)))?
            .page_count();

        let document = SignatureDocument::from_new(new, page_count, Utc::now())?;
        let created = AuditDraft::new(AuditEvent::DocumentCreated)
            .at(document.created_at)
            .meta("title", &document.title)
            .meta("recipients", document.recipients.len())
            .meta("fields", document.fields.len());
        self.inner.store.commit(&document, vec![created]).await?;

        info!(document_id = %document.id, pages = page_count, "Document created");
        Ok(document)
    }

    pub async fn dispatch(&self, document_id: &str) -> Result<SignatureDocument> {
        let _guard = self.lock(document_id).await?;
        let mut document = self.inner.store.load(document_id).await?;
        self.check_expiry(&mut document).await?;

        let drafts = state_machine::dispatch(&mut document, Utc::now())?;
        self.inner.store.commit(&document, drafts).await?;

        info!(document_id, recipients = document.recipients.len(), "Document sent");
        self.inner.bus.publish(SigningEvent::DocumentSent {
            document_id: document.id.clone(),
        });
        Ok(document)
    }

    /// Document for a recipient's link, locked
    async fn load_for_recipient(
        &self,
        recipient_id: &str,
    ) -> Result<(OwnedMutexGuard<()>, SignatureDocument, usize)> {
        let document_id = self.inner.store.find_by_recipient(recipient_id).await?.id;
        let guard = self.lock(&document_id).await?;
        let mut document = self.inner.store.load(&document_id).await?;
        self.check_expiry(&mut document).await?;
        let index = recipient_position(&document, recipient_id)?;
        Ok((guard, document, index))
    }

    pub async fn record_view(
        &self,
        recipient_id: &str,
        client: ClientContext,
    ) -> Result<SignatureDocument> {
        let (_guard, mut document, index) = self.load_for_recipient(recipient_id).await?;
        check_access_code(&document.recipients[index], client.access_code.as_deref())?;

        let drafts = state_machine::record_view(&mut document, index, &client, Utc::now())?;
        self.inner.store.commit(&document, drafts).await?;

        debug!(document_id = %document.id, recipient_id, "Document viewed");
        Ok(document)
    }

    pub async fn record_signature(
        &self,
        recipient_id: &str,
        submission: SignatureSubmission,
        client: ClientContext,
    ) -> Result<SignatureDocument> {
        let (_guard, mut document, index) = self.load_for_recipient(recipient_id).await?;

        // Identity first: the order gate names other signers
        if let Err(e) = check_access_code(&document.recipients[index], client.access_code.as_deref()) {
            return Err(self.reject(&document, index, e, &client).await);
        }
        state_machine::check_can_sign(&document, index)?;

        if let Err(e) = state_machine::validate_submission(&document, index, &submission) {
            return Err(self.reject(&document, index, e, &client).await);
        }

        let signature = match submission
            .signature_image
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            Some(encoded) => match self.store_signature(&document, index, encoded).await {
                Ok(reference) => Some(reference),
                Err(e @ SigningError::Validation(_)) => {
                    return Err(self.reject(&document, index, e, &client).await)
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        let outcome = state_machine::apply_signature(
            &mut document,
            index,
            &submission,
            signature,
            &client,
            Utc::now(),
        );
        self.inner.store.commit(&document, outcome.drafts).await?;

        let email = document.recipients[index].email.clone();
        info!(document_id = %document.id, recipient = %email, completed = outcome.completed, "Document signed");
        self.inner.bus.publish(SigningEvent::DocumentSigned {
            document_id: document.id.clone(),
            recipient_email: email,
        });
        if let Some(completed_at) = document.completed_at.filter(|_| outcome.completed) {
            self.inner.bus.publish(SigningEvent::DocumentCompleted {
                document_id: document.id.clone(),
                completed_at,
            });
        }
        Ok(document)
    }

    /// Record a rejected signing attempt and hand back the error
    async fn reject(
        &self,
        document: &SignatureDocument,
        index: usize,
        error: SigningError,
        client: &ClientContext,
    ) -> SigningError {
        warn!(
            document_id = %document.id,
            recipient = %state_machine::mask_email(&document.recipients[index].email),
            error = %error,
            "Signature rejected"
        );
        let draft = state_machine::rejected_attempt(document, index, &error, client, Utc::now());
        match self.inner.store.append_audit(&document.id, vec![draft]).await {
            Ok(_) => error,
            Err(append_error) => append_error,
        }
    }

    async fn store_signature(
        &self,
        document: &SignatureDocument,
        index: usize,
        encoded: &str,
    ) -> Result<SignatureImageRef> {
        let recipient = &document.recipients[index];
        let sealed = self.inner.crypto.seal_signature_image(&recipient.id, encoded)?;
        let key = format!("signatures/{}/{}.sealed", document.id, recipient.id);
        let storage = self.inner.files.put(&key, sealed.payload).await?;

        Ok(SignatureImageRef {
            storage,
            checksum: sealed.checksum,
            media_type: sealed.media_type.to_string(),
            algorithm: self.inner.crypto.algorithm().to_string(),
            version: self.inner.crypto.version(),
        })
    }

    pub async fn record_decline(
        &self,
        recipient_id: &str,
        reason: Option<String>,
        client: ClientContext,
    ) -> Result<SignatureDocument> {
        let (_guard, mut document, index) = self.load_for_recipient(recipient_id).await?;
        check_access_code(&document.recipients[index], client.access_code.as_deref())?;

        let drafts = state_machine::record_decline(
            &mut document,
            index,
            reason.as_deref(),
            &client,
            Utc::now(),
        )?;
        self.inner.store.commit(&document, drafts).await?;

        let email = document.recipients[index].email.clone();
        let document_declined = document.status == DocumentStatus::Declined;
        info!(document_id = %document.id, recipient = %email, document_declined, "Recipient declined");
        self.inner.bus.publish(SigningEvent::DocumentDeclined {
            document_id: document.id.clone(),
            recipient_email: email,
            document_declined,
        });
        Ok(document)
    }

    /// Expire an overdue document explicitly
    pub async fn expire(&self, document_id: &str) -> Result<SignatureDocument> {
        let _guard = self.lock(document_id).await?;
        let mut document = self.inner.store.load(document_id).await?;

        let drafts = state_machine::expire(&mut document, Utc::now())?;
        self.inner.store.commit(&document, drafts).await?;

        info!(document_id, "Document expired");
        self.inner.bus.publish(SigningEvent::DocumentExpired {
            document_id: document.id.clone(),
        });
        Ok(document)
    }

    fn require_completed(document: &SignatureDocument) -> Result<()> {
        if document.status == DocumentStatus::Completed {
            Ok(())
        } else {
            Err(SigningError::invalid_state(format!(
                "document is {}, not completed",
                document.status
            )))
        }
    }

    /// Stored final PDF, rendering and storing it first if needed. Lock held.
    async fn final_document(&self, document: &mut SignatureDocument) -> Result<Vec<u8>> {
        let finalizer = self.finalizer();
        if let Some(pdf) = finalizer.load_stored(document).await? {
            return Ok(pdf);
        }
        let finalized = finalizer.finalize(document).await?;
        self.inner.store.commit(document, finalized.drafts).await?;
        Ok(finalized.pdf)
    }

    /// The completed PDF with every field burned in
    pub async fn render_final_document(&self, document_id: &str) -> Result<Vec<u8>> {
        let _guard = self.lock(document_id).await?;
        let mut document = self.inner.store.load(document_id).await?;
        Self::require_completed(&document)?;
        self.final_document(&mut document).await
    }

    /// Issue (or re-issue) the completion certificate
    pub async fn generate_certificate(&self, document_id: &str) -> Result<Certificate> {
        let _guard = self.lock(document_id).await?;
        let mut document = self.inner.store.load(document_id).await?;
        Self::require_completed(&document)?;
        let completed_at = document
            .completed_at
            .ok_or_else(|| SigningError::invalid_state("completed document has no completion time"))?;

        self.final_document(&mut document).await?;
        let document_hash = document
            .metadata
            .encryption
            .as_ref()
            .map(|e| e.content_hash.clone())
            .ok_or_else(|| SigningError::storage("final document was not recorded"))?;

        let candidate = CertificateRecord {
            certificate_id: certificate_id(&document.id, completed_at),
            document_id: document.id.clone(),
            document_hash,
            completed_at,
            generated_at: Utc::now(),
        };
        let (record, created) = self
            .inner
            .store
            .insert_certificate_if_absent(candidate)
            .await?;

        if created {
            self.inner
                .store
                .append_audit(
                    &document.id,
                    vec![AuditDraft::new(AuditEvent::CertificateGenerated)
                        .meta("certificate_id", &record.certificate_id)
                        .meta("document_hash", &record.document_hash)],
                )
                .await?;
            info!(document_id, certificate_id = %record.certificate_id, "Certificate generated");
        }

        let entries = self.inner.store.audit_entries(&document.id).await?;
        let content = build_content(
            &self.inner.settings.organization,
            &record,
            &document,
            &entries,
            self.inner.settings.audit_excerpt,
        );
        let pdf = render_certificate(&content)?;

        Ok(Certificate {
            record,
            pdf,
            created,
        })
    }

    pub async fn download_certificate(&self, document_id: &str) -> Result<Certificate> {
        let certificate = self.generate_certificate(document_id).await?;
        let _guard = self.lock(document_id).await?;
        self.inner
            .store
            .append_audit(
                document_id,
                vec![AuditDraft::new(AuditEvent::CertificateDownloaded)
                    .meta("certificate_id", &certificate.record.certificate_id)],
            )
            .await?;
        Ok(certificate)
    }

    /// Check a certificate against the stored final document.
    ///
    /// Verification failures are reported in the result; only store errors
    /// surface as `Err`.
    pub async fn verify_certificate(&self, certificate_id: &str) -> Result<Verification> {
        let Some(record) = self.inner.store.load_certificate(certificate_id).await? else {
            return Ok(Verification::failed(certificate_id, None, "certificate not found"));
        };
        let fail = |reason: &str| -> Result<Verification> {
            Ok(Verification::failed(certificate_id, Some(&record), reason))
        };

        let _guard = self.lock(&record.document_id).await?;
        let document = match self.inner.store.load(&record.document_id).await {
            Ok(document) => document,
            Err(SigningError::NotFound(_)) => return fail("document not found"),
            Err(e) => return Err(e),
        };
        if document.status != DocumentStatus::Completed {
            return fail("document is not completed");
        }

        let pdf = match self.finalizer().load_stored(&document).await {
            Ok(Some(pdf)) => pdf,
            Ok(None) | Err(SigningError::NotFound(_)) => return fail("final document is missing"),
            Err(e @ SigningError::Integrity(_)) => {
                let reason = e.to_string();
                self.certificate_check_failed(&document.id, certificate_id, &record, &reason)
                    .await?;
                return fail(&reason);
            }
            Err(SigningError::Validation(_) | SigningError::Encryption(_)) => {
                return fail("final document could not be decrypted")
            }
            Err(e) => return Err(e),
        };

        let actual = esign_crypto::sha256_hex(&pdf);
        if actual != record.document_hash {
            let reason = SigningError::Integrity(format!(
                "document hash {} does not match certificate hash {}",
                actual, record.document_hash
            ))
            .to_string();
            self.certificate_check_failed(&document.id, certificate_id, &record, &reason)
                .await?;
            return fail(&reason);
        }

        Ok(Verification::verified(&record))
    }

    async fn certificate_check_failed(
        &self,
        document_id: &str,
        certificate_id: &str,
        record: &CertificateRecord,
        reason: &str,
    ) -> Result<()> {
        warn!(certificate_id, document_id, reason, "Certificate verification failed");
        self.inner
            .store
            .append_audit(
                document_id,
                vec![AuditDraft::new(AuditEvent::IntegrityCheckFailed)
                    .meta("certificate_id", certificate_id)
                    .meta("expected", &record.document_hash)
                    .meta("reason", reason)],
            )
            .await?;
        Ok(())
    }

    pub async fn audit_trail(&self, document_id: &str) -> Result<Vec<AuditLogEntry>> {
        self.inner.store.load(document_id).await?;
        self.audit().entries(document_id).await
    }

    pub async fn timeline(&self, document_id: &str) -> Result<Vec<TimelineEntry>> {
        let document = self.inner.store.load(document_id).await?;
        let entries = self.audit().entries(document_id).await?;
        Ok(timeline(&document, &entries))
    }

    /// Recompute the sealed artifact's checksum and re-derive the audit chain
    pub async fn verify_document_integrity(&self, document_id: &str) -> Result<IntegrityReport> {
        let _guard = self.lock(document_id).await?;
        let document = self.inner.store.load(document_id).await?;
        let encryption = document
            .metadata
            .encryption
            .as_ref()
            .ok_or_else(|| SigningError::invalid_state("document has no sealed final copy"))?;

        let sealed = self.inner.files.fetch(&encryption.completed_document).await?;
        let checked = self
            .inner
            .crypto
            .verify_checksum(&sealed, &encryption.sealed_checksum)
            .map_err(SigningError::from)
            .and_then(|_| {
                self.inner
                    .crypto
                    .open_document(&document.id, &sealed)
                    .map_err(SigningError::from)
            })
            .and_then(|pdf| {
                self.inner
                    .crypto
                    .verify_checksum(&pdf, &encryption.content_hash)
                    .map_err(SigningError::from)
            });

        if let Err(e) = checked {
            warn!(document_id, error = %e, "Document integrity check failed");
            self.inner
                .store
                .append_audit(
                    document_id,
                    vec![AuditDraft::new(AuditEvent::IntegrityCheckFailed)
                        .meta("reason", &e)
                        .meta("expected", &encryption.sealed_checksum)],
                )
                .await?;
            return Err(e);
        }

        let audit_entries = self.audit().verify(document_id).await?;
        Ok(IntegrityReport {
            document_id: document.id.clone(),
            sealed_checksum: encryption.sealed_checksum.clone(),
            content_hash: encryption.content_hash.clone(),
            audit_entries,
        })
    }

    /// Put an open password on the completed document after the fact.
    ///
    /// Returns the password. Refused once a certificate exists, since the
    /// certified hash would no longer match.
    pub async fn protect_completed_document(
        &self,
        document_id: &str,
        password: Option<String>,
    ) -> Result<Zeroizing<String>> {
        let _guard = self.lock(document_id).await?;
        let mut document = self.inner.store.load(document_id).await?;
        Self::require_completed(&document)?;

        if self
            .inner
            .store
            .certificate_for_document(document_id)
            .await?
            .is_some()
        {
            return Err(SigningError::invalid_state(
                "certificate already issued for this document",
            ));
        }
        if document
            .metadata
            .encryption
            .as_ref()
            .is_some_and(|e| e.password_protected)
        {
            return Err(SigningError::invalid_state(
                "document is already password protected",
            ));
        }

        let password = match password {
            Some(p) if p.trim().is_empty() => {
                return Err(SigningError::validation("password must not be empty"))
            }
            Some(p) => Zeroizing::new(p),
            None => EncryptionService::generate_password(),
        };

        let mut drafts = Vec::new();
        let finalizer = self.finalizer();
        let pdf = match finalizer.load_stored(&document).await? {
            Some(pdf) => pdf,
            None => {
                drafts.push(
                    AuditDraft::new(AuditEvent::DocumentRendered)
                        .meta("pages", document.page_count)
                        .meta("fields", document.fields.len()),
                );
                finalizer.render(&document).await?
            }
        };

        let sealed = finalizer
            .seal_and_store(&mut document, pdf, Some(password.as_str()))
            .await?;
        drafts.extend(sealed.drafts);
        self.inner.store.commit(&document, drafts).await?;

        info!(document_id, "Completed document password protected");
        Ok(password)
    }

    /// Open the stored unlock password; the reveal itself is audited
    pub async fn reveal_document_password(
        &self,
        document_id: &str,
        requested_by: Option<&str>,
    ) -> Result<Zeroizing<String>> {
        let _guard = self.lock(document_id).await?;
        let document = self.inner.store.load(document_id).await?;
        let password = self
            .finalizer()
            .load_password(&document)
            .await?
            .ok_or_else(|| SigningError::not_found("document has no stored password"))?;

        let mut draft = AuditDraft::new(AuditEvent::PasswordRevealed);
        if let Some(who) = requested_by {
            draft = draft.meta("requested_by", who);
        }
        self.inner.store.append_audit(document_id, vec![draft]).await?;
        Ok(password)
    }
}
