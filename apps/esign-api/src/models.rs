//! Request and response bodies for the e-sign API

use chrono::{DateTime, Utc};
use esign_core::{hash_access_code, mask_email, Certificate, CertificateRecord};
use esign_types::{
    DocumentStatus, Field, NewField, NewRecipient, RecipientRole, RecipientStatus,
    SignatureDocument,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

fn default_required() -> bool {
    true
}

/// Recipient as supplied by the sender
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientInput {
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    pub signing_order: u32,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Plaintext; hashed before it reaches the core
    #[serde(default)]
    pub access_code: Option<String>,
}

impl RecipientInput {
    pub fn into_new(self) -> NewRecipient {
        NewRecipient {
            name: self.name,
            email: self.email,
            role: self.role,
            signing_order: self.signing_order,
            required: self.required,
            access_code_hash: self
                .access_code
                .filter(|c| !c.trim().is_empty())
                .map(|c| hash_access_code(&c)),
        }
    }
}

/// Request to create a document in draft
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDocumentRequest {
    pub team_id: String,
    pub title: String,
    pub pdf_base64: String,
    pub recipients: Vec<RecipientInput>,
    #[serde(default)]
    pub fields: Vec<NewField>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub expires_in_hours: Option<i64>,
}

/// Recipient as shown to API callers; never carries the access code digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    pub signing_order: u32,
    pub required: bool,
    pub status: RecipientStatus,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
    pub access_code_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: String,
    pub team_id: String,
    pub title: String,
    pub status: DocumentStatus,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
    pub recipients: Vec<RecipientView>,
    pub fields: Vec<Field>,
}

impl From<SignatureDocument> for DocumentResponse {
    fn from(doc: SignatureDocument) -> Self {
        let recipients = doc
            .recipients
            .into_iter()
            .map(|r| RecipientView {
                access_code_required: r.access_code_hash.is_some(),
                id: r.id,
                name: r.name,
                email: r.email,
                role: r.role,
                signing_order: r.signing_order,
                required: r.required,
                status: r.status,
                viewed_at: r.viewed_at,
                signed_at: r.signed_at,
                declined_at: r.declined_at,
                decline_reason: r.decline_reason,
            })
            .collect();

        Self {
            metadata: doc.metadata.to_map(),
            id: doc.id,
            team_id: doc.team_id,
            title: doc.title,
            status: doc.status,
            page_count: doc.page_count,
            created_at: doc.created_at,
            sent_at: doc.sent_at,
            completed_at: doc.completed_at,
            expires_at: doc.expires_at,
            recipients,
            fields: doc.fields,
        }
    }
}

/// Signer-facing acknowledgement; other recipients are not exposed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningResponse {
    pub document_id: String,
    pub document_status: DocumentStatus,
    pub recipient_id: String,
    pub recipient_status: RecipientStatus,
    pub masked_email: String,
}

impl SigningResponse {
    pub fn for_recipient(doc: &SignatureDocument, recipient_id: &str) -> Option<Self> {
        let recipient = doc.recipients.iter().find(|r| r.id == recipient_id)?;
        Some(Self {
            document_id: doc.id.clone(),
            document_status: doc.status,
            recipient_id: recipient.id.clone(),
            recipient_status: recipient.status,
            masked_email: mask_email(&recipient.email),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ViewRequest {
    #[serde(default)]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignRequest {
    #[serde(default)]
    pub field_values: BTreeMap<String, String>,
    #[serde(default)]
    pub signature_image: Option<String>,
    #[serde(default)]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeclineRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub access_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProtectRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevealRequest {
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResponse {
    pub document_id: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub certificate_id: String,
    pub document_id: String,
    pub document_hash: String,
    pub completed_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub created: bool,
}

impl From<Certificate> for CertificateResponse {
    fn from(certificate: Certificate) -> Self {
        let CertificateRecord {
            certificate_id,
            document_id,
            document_hash,
            completed_at,
            generated_at,
        } = certificate.record;
        Self {
            certificate_id,
            document_id,
            document_hash,
            completed_at,
            generated_at,
            created: certificate.created,
        }
    }
}
