//! Signing state machine
//!
//! Pure transitions over a loaded document. Each one mutates the document in
//! place and returns the audit drafts recording what happened; the caller
//! commits both together. Nothing here performs I/O.

use chrono::{DateTime, Utc};
use esign_crypto::keys::{constant_time_eq, sha256_hex};
use esign_types::{
    AuditDraft, AuditEvent, DocumentStatus, Recipient, RecipientRole, RecipientStatus, Result,
    SignatureDocument, SignatureImageRef, SigningError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Evidence captured from the signer's request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Plaintext code for recipients gated by an access code; never stored
    #[serde(default, skip_serializing)]
    pub access_code: Option<String>,
}

impl ClientContext {
    pub fn new(ip_address: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            access_code: None,
        }
    }

    pub fn with_access_code(mut self, code: &str) -> Self {
        self.access_code = Some(code.to_string());
        self
    }
}

/// What a recipient submits when signing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSubmission {
    /// Field id to entered value
    #[serde(default)]
    pub field_values: BTreeMap<String, String>,
    /// Data URL or base64 PNG/JPEG
    #[serde(default)]
    pub signature_image: Option<String>,
}

/// Result of an accepted signature
#[derive(Debug, Clone)]
pub struct SignatureOutcome {
    pub drafts: Vec<AuditDraft>,
    pub completed: bool,
}

/// Digest stored in place of a recipient's access code
pub fn hash_access_code(code: &str) -> String {
    sha256_hex(code.trim().as_bytes())
}

/// `jane.doe@example.com` -> `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}

/// Locate a recipient, `NotFound` if the id is not on this document
pub fn recipient_position(document: &SignatureDocument, recipient_id: &str) -> Result<usize> {
    document
        .recipient_index(recipient_id)
        .ok_or_else(|| SigningError::not_found(format!("recipient {}", recipient_id)))
}

fn status_error(document: &SignatureDocument) -> SigningError {
    let reason = match document.status {
        DocumentStatus::Draft => "document has not been sent",
        DocumentStatus::Sent => "document is awaiting signatures",
        DocumentStatus::Completed => "document already completed",
        DocumentStatus::Declined => "document was declined",
        DocumentStatus::Expired => "document expired",
        DocumentStatus::Failed => "document failed",
    };
    SigningError::invalid_state(reason)
}

fn recipient_error(recipient: &Recipient) -> SigningError {
    let reason = match recipient.status {
        RecipientStatus::Pending => "recipient has not been sent the document",
        RecipientStatus::Signed => "recipient already signed",
        RecipientStatus::Declined => "recipient declined",
        RecipientStatus::Sent | RecipientStatus::Viewed => "recipient cannot act",
    };
    SigningError::invalid_state(reason)
}

fn require_sent(document: &SignatureDocument) -> Result<()> {
    if document.status == DocumentStatus::Sent {
        Ok(())
    } else {
        Err(status_error(document))
    }
}

/// Mark an overdue draft or sent document as expired
pub fn expire_if_due(document: &mut SignatureDocument, now: DateTime<Utc>) -> Option<AuditDraft> {
    let open = matches!(document.status, DocumentStatus::Draft | DocumentStatus::Sent);
    if !open || !document.is_expired_at(now) {
        return None;
    }

    document.status = DocumentStatus::Expired;
    let mut draft = AuditDraft::new(AuditEvent::DocumentExpired).at(now);
    if let Some(expires_at) = document.expires_at {
        draft = draft.meta("expires_at", expires_at.to_rfc3339());
    }
    draft = draft.meta("outstanding_signers", document.outstanding_signers());
    Some(draft)
}

/// Explicit expiration of an overdue document
pub fn expire(document: &mut SignatureDocument, now: DateTime<Utc>) -> Result<Vec<AuditDraft>> {
    if !matches!(document.status, DocumentStatus::Draft | DocumentStatus::Sent) {
        return Err(status_error(document));
    }
    match expire_if_due(document, now) {
        Some(draft) => Ok(vec![draft]),
        None => Err(SigningError::invalid_state(
            "document has not reached its expiration",
        )),
    }
}

pub fn dispatch(document: &mut SignatureDocument, now: DateTime<Utc>) -> Result<Vec<AuditDraft>> {
    match document.status {
        DocumentStatus::Draft => {}
        DocumentStatus::Sent => return Err(SigningError::invalid_state("document already sent")),
        _ => return Err(status_error(document)),
    }
    if document.recipients.is_empty() {
        return Err(SigningError::validation("document has no recipients"));
    }
    if !document.recipients.iter().any(|r| r.is_required()) {
        return Err(SigningError::validation(
            "document needs at least one required signer",
        ));
    }

    document.status = DocumentStatus::Sent;
    document.sent_at = Some(now);
    for recipient in &mut document.recipients {
        recipient.status = RecipientStatus::Sent;
    }

    Ok(vec![AuditDraft::new(AuditEvent::DocumentSent)
        .at(now)
        .meta("recipients", document.recipients.len())])
}

/// Check the identity-gating access code, if the recipient has one
pub fn check_access_code(recipient: &Recipient, provided: Option<&str>) -> Result<()> {
    let Some(expected) = &recipient.access_code_hash else {
        return Ok(());
    };
    let provided = provided.ok_or_else(|| SigningError::validation("access code required"))?;
    if constant_time_eq(hash_access_code(provided).as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(SigningError::validation("invalid access code"))
    }
}

/// Record a view. Only the first view changes state; every view is audited.
pub fn record_view(
    document: &mut SignatureDocument,
    index: usize,
    client: &ClientContext,
    now: DateTime<Utc>,
) -> Result<Vec<AuditDraft>> {
    require_sent(document)?;
    let recipient = &mut document.recipients[index];

    let first_view = match recipient.status {
        RecipientStatus::Sent => true,
        RecipientStatus::Viewed | RecipientStatus::Signed => false,
        RecipientStatus::Pending | RecipientStatus::Declined => {
            return Err(recipient_error(recipient))
        }
    };

    if first_view {
        recipient.status = RecipientStatus::Viewed;
        recipient.viewed_at = Some(now);
        recipient.ip_address = client.ip_address.clone();
        recipient.user_agent = client.user_agent.clone();
    }

    Ok(vec![AuditDraft::new(AuditEvent::DocumentViewed)
        .at(now)
        .recipient(&recipient.email)
        .client(client.ip_address.as_deref(), client.user_agent.as_deref())
        .meta("first_view", first_view)])
}

/// State and order preconditions for signing
pub fn check_can_sign(document: &SignatureDocument, index: usize) -> Result<()> {
    require_sent(document)?;
    let recipient = &document.recipients[index];
    if recipient.role == RecipientRole::Viewer {
        return Err(SigningError::invalid_state("viewers do not sign"));
    }
    if !recipient.is_actionable() {
        return Err(recipient_error(recipient));
    }

    let blockers = document.blocking_recipients(index);
    if !blockers.is_empty() {
        return Err(SigningError::OrderViolation {
            waiting_on: blockers.iter().map(|r| r.email.clone()).collect(),
        });
    }
    Ok(())
}

/// Input checks for a signature submission
pub fn validate_submission(
    document: &SignatureDocument,
    index: usize,
    submission: &SignatureSubmission,
) -> Result<()> {
    for field_id in submission.field_values.keys() {
        let owned = document
            .fields
            .iter()
            .any(|f| &f.id == field_id && f.recipient_index == Some(index));
        if !owned {
            return Err(SigningError::validation(format!(
                "field {} is not assigned to this recipient",
                field_id
            )));
        }
    }

    let has_image = submission
        .signature_image
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());

    let missing: Vec<String> = document
        .fields_for(index)
        .filter(|f| f.required)
        .filter(|f| {
            if f.field_type.is_image() {
                !has_image
            } else {
                let submitted = submission
                    .field_values
                    .get(&f.id)
                    .is_some_and(|v| !v.trim().is_empty());
                !submitted && !f.has_value()
            }
        })
        .map(|f| f.display_label())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SigningError::validation(format!(
            "missing required fields: {}",
            missing.join(", ")
        )))
    }
}

/// Apply an accepted signature. Preconditions must already be checked.
pub fn apply_signature(
    document: &mut SignatureDocument,
    index: usize,
    submission: &SignatureSubmission,
    signature: Option<SignatureImageRef>,
    client: &ClientContext,
    now: DateTime<Utc>,
) -> SignatureOutcome {
    for field in document.fields.iter_mut() {
        if field.recipient_index != Some(index) {
            continue;
        }
        if let Some(value) = submission.field_values.get(&field.id) {
            field.value = Some(value.trim().to_string());
        }
    }

    let mut drafts = Vec::new();
    let recipient = &mut document.recipients[index];
    let email = recipient.email.clone();

    if let Some(image) = &signature {
        drafts.push(
            AuditDraft::new(AuditEvent::SignatureEncrypted)
                .at(now)
                .recipient(&email)
                .meta("algorithm", &image.algorithm)
                .meta("version", image.version)
                .meta("checksum", &image.checksum),
        );
    }

    recipient.status = RecipientStatus::Signed;
    recipient.signed_at = Some(now);
    recipient.viewed_at.get_or_insert(now);
    recipient.ip_address = client.ip_address.clone();
    recipient.user_agent = client.user_agent.clone();
    if signature.is_some() {
        recipient.signature = signature;
    }
    let order = recipient.signing_order;

    drafts.push(
        AuditDraft::new(AuditEvent::DocumentSigned)
            .at(now)
            .recipient(&email)
            .client(client.ip_address.as_deref(), client.user_agent.as_deref())
            .meta("signing_order", order)
            .meta("fields", submission.field_values.len()),
    );

    let completed = document.outstanding_signers() == 0;
    if completed {
        document.status = DocumentStatus::Completed;
        document.completed_at = Some(now);
        drafts.push(
            AuditDraft::new(AuditEvent::DocumentCompleted)
                .at(now)
                .meta(
                    "signers",
                    document.recipients.iter().filter(|r| r.is_signed()).count(),
                ),
        );
    }

    SignatureOutcome { drafts, completed }
}

/// Audit entry for a submission rejected by validation
pub fn rejected_attempt(
    document: &SignatureDocument,
    index: usize,
    error: &SigningError,
    client: &ClientContext,
    now: DateTime<Utc>,
) -> AuditDraft {
    AuditDraft::new(AuditEvent::SignatureRejected)
        .at(now)
        .recipient(&document.recipients[index].email)
        .client(client.ip_address.as_deref(), client.user_agent.as_deref())
        .meta("reason", error)
}

pub fn record_decline(
    document: &mut SignatureDocument,
    index: usize,
    reason: Option<&str>,
    client: &ClientContext,
    now: DateTime<Utc>,
) -> Result<Vec<AuditDraft>> {
    require_sent(document)?;
    let recipient = &mut document.recipients[index];
    if !recipient.is_actionable() {
        return Err(recipient_error(recipient));
    }

    let reason = reason.map(str::trim).filter(|r| !r.is_empty());
    recipient.status = RecipientStatus::Declined;
    recipient.declined_at = Some(now);
    recipient.decline_reason = reason.map(str::to_string);
    recipient.ip_address = client.ip_address.clone();
    recipient.user_agent = client.user_agent.clone();

    let email = recipient.email.clone();
    let fails_document = recipient.is_required();
    if fails_document {
        document.status = DocumentStatus::Declined;
    }

    Ok(vec![AuditDraft::new(AuditEvent::DocumentDeclined)
        .at(now)
        .recipient(&email)
        .client(client.ip_address.as_deref(), client.user_agent.as_deref())
        .meta("reason", reason.unwrap_or("not given"))
        .meta("document_declined", fails_document)])
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;
    use esign_types::{
        DocumentMetadata, FieldType, NewDocument, NewField, NewRecipient, StorageRef, StorageType,
    };

    pub fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap()
    }

    pub fn new_recipient(name: &str, order: u32) -> NewRecipient {
        NewRecipient {
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            role: RecipientRole::Signer,
            signing_order: order,
            required: true,
            access_code_hash: None,
        }
    }

    pub fn new_field(field_type: FieldType, recipient: usize, label: &str) -> NewField {
        NewField {
            field_type,
            page_number: 1,
            x: 10.0,
            y: 10.0 + recipient as f64 * 20.0,
            width: 30.0,
            height: 5.0,
            label: Some(label.to_string()),
            placeholder: None,
            required: true,
            recipient_index: Some(recipient),
            value: None,
        }
    }

    /// Draft document for the given recipients
    pub fn document(recipients: Vec<NewRecipient>, fields: Vec<NewField>) -> SignatureDocument {
        SignatureDocument::from_new(
            NewDocument {
                team_id: "team-1".to_string(),
                title: "Subscription Agreement".to_string(),
                source: StorageRef::new(StorageType::Memory, "source.pdf"),
                expires_at: None,
                metadata: DocumentMetadata::default(),
                recipients,
                fields,
            },
            1,
            t(0),
        )
        .unwrap()
    }

    pub fn sent(recipients: Vec<NewRecipient>, fields: Vec<NewField>) -> SignatureDocument {
        let mut doc = document(recipients, fields);
        dispatch(&mut doc, t(1)).unwrap();
        doc
    }
}


#[cfg(test)]
mod proptests {
    use super::fixtures::*;
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: no recipient ever signs while a required recipient with a
        /// lower order is unsigned, and completion matches the signed set.
        #[test]
        fn order_gate_holds(
            orders in prop::collection::vec((1u32..4, any::<bool>()), 1..6),
            attempts in prop::collection::vec(0usize..6, 0..20),
        ) {
            let recipients: Vec<_> = orders
                .iter()
                .enumerate()
                .map(|(i, (order, required))| {
                    let mut r = new_recipient(&format!("R{}", i), *order);
                    r.required = *required;
                    r
                })
                .collect();
            let mut doc = document(recipients, vec![]);
            prop_assume!(doc.recipients.iter().any(|r| r.is_required()));
            dispatch(&mut doc, t(1)).unwrap();

            for (minute, raw) in attempts.into_iter().enumerate() {
                let index = raw % doc.recipients.len();
                let had_blockers = !doc.blocking_recipients(index).is_empty();
                let result = check_can_sign(&doc, index);

                if had_blockers && doc.status == DocumentStatus::Sent && doc.recipients[index].is_actionable() {
                    let is_order_violation = matches!(result, Err(SigningError::OrderViolation { .. }));
                    prop_assert!(is_order_violation);
                }
                if result.is_ok() {
                    apply_signature(
                        &mut doc,
                        index,
                        &SignatureSubmission::default(),
                        None,
                        &ClientContext::default(),
                        t(2 + minute as u32),
                    );
                }

                prop_assert!(doc.check_invariants().is_ok(), "{:?}", doc.check_invariants());
                let all_required_signed = doc.outstanding_signers() == 0;
                prop_assert_eq!(doc.status == DocumentStatus::Completed, all_required_signed);
            }
        }
    }
}
