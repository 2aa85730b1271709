//! Finalization of completed documents
//!
//! Render the signed PDF, optionally put an open password on it, seal it and
//! store it. Produces the audit drafts and metadata for the caller to commit.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use esign_crypto::{EncryptionService, Permissions};
use esign_pdf::{render_document, RenderOptions};
use esign_types::{
    AuditDraft, AuditEvent, EncryptionMetadata, Result, SignatureDocument, SigningError,
};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::certificate::certificate_id;
use crate::store::FileStore;

fn document_key(document_id: &str) -> String {
    format!("completed/{}.pdf.sealed", document_id)
}

fn password_key(document_id: &str) -> String {
    format!("passwords/{}.sealed", document_id)
}

/// Final PDF plus the drafts recording how it was stored
pub(crate) struct Finalized {
    pub pdf: Vec<u8>,
    pub drafts: Vec<AuditDraft>,
}

pub(crate) struct Finalizer<'a> {
    pub files: &'a dyn FileStore,
    pub crypto: &'a EncryptionService,
    pub render: &'a RenderOptions,
    pub timeout: Duration,
}

impl Finalizer<'_> {
    /// Fetch the source and signature images, then render, within the timeout
    pub async fn render(&self, document: &SignatureDocument) -> Result<Vec<u8>> {
        let work = async {
            let source = self.files.fetch(&document.source).await?;
            let signatures = self.signature_images(document).await?;

            let doc = document.clone();
            let mut options = self.render.clone();
            if let Some(completed_at) = document.completed_at {
                options.certificate_id = Some(certificate_id(&document.id, completed_at));
            }
            tokio::task::spawn_blocking(move || {
                render_document(&doc, &source, &signatures, &options)
            })
            .await
            .map_err(|e| SigningError::Render(format!("render task failed: {}", e)))?
            .map_err(SigningError::from)
        };

        let pdf = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| {
                SigningError::Timeout(format!(
                    "rendering exceeded {}s",
                    self.timeout.as_secs()
                ))
            })??;

        debug!(document_id = %document.id, bytes = pdf.len(), "Rendered final document");
        Ok(pdf)
    }

    async fn signature_images(
        &self,
        document: &SignatureDocument,
    ) -> Result<HashMap<String, Vec<u8>>> {
        let mut images = HashMap::new();
        for recipient in &document.recipients {
            let Some(signature) = &recipient.signature else {
                continue;
            };
            let sealed = self.files.fetch(&signature.storage).await?;
            let plain =
                self.crypto
                    .open_signature_image(&recipient.id, &sealed, &signature.checksum)?;
            images.insert(recipient.id.clone(), plain.to_vec());
        }
        Ok(images)
    }

    /// Protect (optionally), seal and store `pdf`, recording it in the metadata.
    ///
    /// Overwrites any previously stored artifact for the document.
    pub async fn seal_and_store(
        &self,
        document: &mut SignatureDocument,
        pdf: Vec<u8>,
        password: Option<&str>,
    ) -> Result<Finalized> {
        let now = Utc::now();
        let mut drafts = Vec::new();

        let (pdf, password_ref) = match password {
            Some(password) => {
                let protected =
                    self.crypto
                        .protect_pdf(&document.id, &pdf, password, Permissions::default())?;
                let sealed = self.crypto.seal_password(&document.id, password)?;
                let reference = self.files.put(&password_key(&document.id), sealed).await?;
                drafts.push(
                    AuditDraft::new(AuditEvent::PasswordStored)
                        .at(now)
                        .meta("algorithm", self.crypto.algorithm())
                        .meta("version", self.crypto.version()),
                );
                (protected, Some(reference))
            }
            None => (pdf, None),
        };

        let sealed = self.crypto.seal_document(&document.id, &pdf)?;
        let reference = self
            .files
            .put(&document_key(&document.id), sealed.bytes)
            .await?;

        drafts.push(
            AuditDraft::new(AuditEvent::DocumentEncrypted)
                .at(now)
                .meta("algorithm", self.crypto.algorithm())
                .meta("version", self.crypto.version())
                .meta("sealed_checksum", &sealed.sealed_checksum)
                .meta("content_hash", &sealed.content_hash)
                .meta("password_protected", password_ref.is_some()),
        );

        info!(
            document_id = %document.id,
            password_protected = password_ref.is_some(),
            "Sealed completed document"
        );

        document.metadata.encryption = Some(EncryptionMetadata {
            algorithm: self.crypto.algorithm().to_string(),
            version: self.crypto.version(),
            key_id: self.crypto.active_key_id().to_string(),
            completed_document: reference,
            sealed_checksum: sealed.sealed_checksum,
            content_hash: sealed.content_hash,
            password_protected: password_ref.is_some(),
            password: password_ref,
            sealed_at: now,
        });

        Ok(Finalized { pdf, drafts })
    }

    /// Render and store a completed document for the first time
    pub async fn finalize(&self, document: &mut SignatureDocument) -> Result<Finalized> {
        let pdf = self.render(document).await?;
        let rendered = AuditDraft::new(AuditEvent::DocumentRendered)
            .meta("pages", document.page_count)
            .meta("fields", document.fields.len());

        let password = document
            .metadata
            .flags
            .require_password_protection
            .then(EncryptionService::generate_password);

        let mut finalized = self
            .seal_and_store(document, pdf, password.as_deref().map(|p| p.as_str()))
            .await?;
        finalized.drafts.insert(0, rendered);
        Ok(finalized)
    }

    /// Open the stored artifact. `None` if the document was never finalized.
    pub async fn load_stored(&self, document: &SignatureDocument) -> Result<Option<Vec<u8>>> {
        let Some(encryption) = &document.metadata.encryption else {
            return Ok(None);
        };
        let sealed = self.files.fetch(&encryption.completed_document).await?;
        self.crypto.verify_checksum(&sealed, &encryption.sealed_checksum)?;
        let pdf = self.crypto.open_document(&document.id, &sealed)?;
        Ok(Some(pdf))
    }

    /// Open the sealed unlock password, if one was stored
    pub async fn load_password(
        &self,
        document: &SignatureDocument,
    ) -> Result<Option<Zeroizing<String>>> {
        let Some(reference) = document
            .metadata
            .encryption
            .as_ref()
            .and_then(|e| e.password.as_ref())
        else {
            return Ok(None);
        };
        let sealed = self.files.fetch(reference).await?;
        Ok(Some(self.crypto.open_password(&document.id, &sealed)?))
    }
}
