//! Signature documents, recipients and fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::SigningError;
use crate::metadata::DocumentMetadata;

/// Overall document status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    Sent,
    Completed,
    Declined,
    Expired,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::Sent => "SENT",
            DocumentStatus::Completed => "COMPLETED",
            DocumentStatus::Declined => "DECLINED",
            DocumentStatus::Expired => "EXPIRED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    /// No further signing activity is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed
                | DocumentStatus::Declined
                | DocumentStatus::Expired
                | DocumentStatus::Failed
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(DocumentStatus::Draft),
            "SENT" => Ok(DocumentStatus::Sent),
            "COMPLETED" => Ok(DocumentStatus::Completed),
            "DECLINED" => Ok(DocumentStatus::Declined),
            "EXPIRED" => Ok(DocumentStatus::Expired),
            "FAILED" => Ok(DocumentStatus::Failed),
            other => Err(SigningError::validation(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

/// Per-recipient status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Viewed,
    Signed,
    Declined,
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecipientStatus::Pending => "pending",
            RecipientStatus::Sent => "sent",
            RecipientStatus::Viewed => "viewed",
            RecipientStatus::Signed => "signed",
            RecipientStatus::Declined => "declined",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientRole {
    Signer,
    Viewer,
    Approver,
}

impl fmt::Display for RecipientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecipientRole::Signer => "Signer",
            RecipientRole::Viewer => "Viewer",
            RecipientRole::Approver => "Approver",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Signature,
    Initials,
    DateSigned,
    FreeText,
    Checkbox,
    Name,
    Email,
    Company,
    Title,
    Address,
}

impl FieldType {
    /// Filled from the recipient's signature image rather than a string value
    pub fn is_image(self) -> bool {
        matches!(self, FieldType::Signature | FieldType::Initials)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            FieldType::Signature => "Signature",
            FieldType::Initials => "Initials",
            FieldType::DateSigned => "Date Signed",
            FieldType::FreeText => "Text",
            FieldType::Checkbox => "Checkbox",
            FieldType::Name => "Name",
            FieldType::Email => "Email",
            FieldType::Company => "Company",
            FieldType::Title => "Title",
            FieldType::Address => "Address",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    Local,
    S3,
    Database,
    Memory,
}

/// Opaque reference to bytes held by the storage collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageRef {
    pub storage_type: StorageType,
    pub key: String,
}

impl StorageRef {
    pub fn new(storage_type: StorageType, key: impl Into<String>) -> Self {
        Self {
            storage_type,
            key: key.into(),
        }
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.storage_type, self.key)
    }
}

/// Sealed signature image held for a recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureImageRef {
    pub storage: StorageRef,
    /// SHA-256 of the decoded plaintext image
    pub checksum: String,
    pub media_type: String,
    pub algorithm: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    /// Positive; recipients sharing a value may act in parallel
    pub signing_order: u32,
    /// Non-required recipients never block completion or later signers
    pub required: bool,
    pub status: RecipientStatus,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub signature: Option<SignatureImageRef>,
    /// SHA-256 (hex) of the identity-gating access code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_code_hash: Option<String>,
}

impl Recipient {
    /// Viewers never need to sign, whatever their flag says
    pub fn is_required(&self) -> bool {
        self.required && self.role != RecipientRole::Viewer
    }

    pub fn is_signed(&self) -> bool {
        self.status == RecipientStatus::Signed
    }

    /// Can still view, sign or decline
    pub fn is_actionable(&self) -> bool {
        matches!(self.status, RecipientStatus::Sent | RecipientStatus::Viewed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub field_type: FieldType,
    /// 1-based
    pub page_number: u32,
    /// Percent of page width/height, origin top-left
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub required: bool,
    /// Index into the document's recipients; `None` for static fields
    pub recipient_index: Option<usize>,
    pub value: Option<String>,
}

impl Field {
    /// Non-blank string value present
    pub fn has_value(&self) -> bool {
        self.value.as_deref().is_some_and(|v| !v.trim().is_empty())
    }

    /// Label used in signer-facing messages
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.field_type.display_name().to_string())
    }

    /// Check the normalized geometry
    pub fn validate_geometry(&self) -> Result<(), SigningError> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SigningError::validation(format!(
                "field {} has non-finite coordinates",
                self.id
            )));
        }
        if !(0.0..=100.0).contains(&self.x) || !(0.0..=100.0).contains(&self.y) {
            return Err(SigningError::validation(format!(
                "field {} position must be within 0-100%",
                self.id
            )));
        }
        if self.width <= 0.0 || self.height <= 0.0 || self.width > 100.0 || self.height > 100.0 {
            return Err(SigningError::validation(format!(
                "field {} size must be within (0, 100]%",
                self.id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureDocument {
    pub id: String,
    pub team_id: String,
    pub title: String,
    pub source: StorageRef,
    pub page_count: u32,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub recipients: Vec<Recipient>,
    pub fields: Vec<Field>,
}

impl SignatureDocument {
    /// Build a draft document from caller input, validating every field
    pub fn from_new(
        new: NewDocument,
        page_count: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, SigningError> {
        if new.title.trim().is_empty() {
            return Err(SigningError::validation("document title must not be empty"));
        }
        if page_count == 0 {
            return Err(SigningError::validation("source document has no pages"));
        }
        if let Some(expires_at) = new.expires_at {
            if expires_at <= now {
                return Err(SigningError::validation("expiration must be in the future"));
            }
        }

        let mut recipients = Vec::with_capacity(new.recipients.len());
        for r in new.recipients {
            if r.name.trim().is_empty() {
                return Err(SigningError::validation("recipient name must not be empty"));
            }
            if !r.email.contains('@') {
                return Err(SigningError::validation(format!(
                    "invalid recipient email: {}",
                    r.email
                )));
            }
            if r.signing_order == 0 {
                return Err(SigningError::validation(format!(
                    "signing order for {} must be positive",
                    r.email
                )));
            }
            recipients.push(Recipient {
                id: Uuid::new_v4().to_string(),
                name: r.name,
                email: r.email,
                role: r.role,
                signing_order: r.signing_order,
                required: r.required && r.role != RecipientRole::Viewer,
                status: RecipientStatus::Pending,
                viewed_at: None,
                signed_at: None,
                declined_at: None,
                decline_reason: None,
                ip_address: None,
                user_agent: None,
                signature: None,
                access_code_hash: r.access_code_hash,
            });
        }

        let mut fields = Vec::with_capacity(new.fields.len());
        for f in new.fields {
            let field = Field {
                id: Uuid::new_v4().to_string(),
                field_type: f.field_type,
                page_number: f.page_number,
                x: f.x,
                y: f.y,
                width: f.width,
                height: f.height,
                label: f.label,
                placeholder: f.placeholder,
                required: f.required,
                recipient_index: f.recipient_index,
                value: f.value,
            };
            field.validate_geometry()?;
            if field.page_number == 0 || field.page_number > page_count {
                return Err(SigningError::validation(format!(
                    "field page {} is outside 1..={}",
                    field.page_number, page_count
                )));
            }
            match field.recipient_index {
                Some(index) if index >= recipients.len() => {
                    return Err(SigningError::validation(format!(
                        "field references recipient #{} but only {} exist",
                        index,
                        recipients.len()
                    )));
                }
                None if field.required && !field.has_value() => {
                    return Err(SigningError::validation(
                        "a required static field needs a value",
                    ));
                }
                _ => {}
            }
            fields.push(field);
        }

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            team_id: new.team_id,
            title: new.title,
            source: new.source,
            page_count,
            status: DocumentStatus::Draft,
            created_at: now,
            sent_at: None,
            completed_at: None,
            expires_at: new.expires_at,
            metadata: new.metadata,
            recipients,
            fields,
        })
    }

    pub fn recipient_index(&self, recipient_id: &str) -> Option<usize> {
        self.recipients.iter().position(|r| r.id == recipient_id)
    }

    /// Fields the given recipient must fill
    pub fn fields_for(&self, recipient_index: usize) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(move |f| f.recipient_index == Some(recipient_index))
    }

    /// Required recipients with a strictly lower signing order that have not signed
    pub fn blocking_recipients(&self, recipient_index: usize) -> Vec<&Recipient> {
        let Some(me) = self.recipients.get(recipient_index) else {
            return Vec::new();
        };
        self.recipients
            .iter()
            .filter(|r| r.signing_order < me.signing_order && r.is_required() && !r.is_signed())
            .collect()
    }

    /// Required recipients still to sign
    pub fn outstanding_signers(&self) -> usize {
        self.recipients
            .iter()
            .filter(|r| r.is_required() && !r.is_signed())
            .count()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Check the structural invariants that must hold after every transition
    pub fn check_invariants(&self) -> Result<(), String> {
        let completed = self.status == DocumentStatus::Completed;
        if completed != self.completed_at.is_some() {
            return Err(format!(
                "completed_at is {:?} while status is {}",
                self.completed_at, self.status
            ));
        }
        if completed && self.outstanding_signers() > 0 {
            return Err("document completed with unsigned required recipients".to_string());
        }
        for (index, recipient) in self.recipients.iter().enumerate() {
            if recipient.is_signed() {
                if let Some(blocker) = self.blocking_recipients(index).first() {
                    return Err(format!(
                        "{} signed before earlier signer {}",
                        recipient.email, blocker.email
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Caller input for a new document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub team_id: String,
    pub title: String,
    pub source: StorageRef,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub recipients: Vec<NewRecipient>,
    #[serde(default)]
    pub fields: Vec<NewField>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipient {
    pub name: String,
    pub email: String,
    pub role: RecipientRole,
    pub signing_order: u32,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Already hashed; plaintext codes never reach the model
    #[serde(default)]
    pub access_code_hash: Option<String>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewField {
    pub field_type: FieldType,
    pub page_number: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub recipient_index: Option<usize>,
    #[serde(default)]
    pub value: Option<String>,
}
