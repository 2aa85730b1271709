mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::{client, field, recipient, signed, Harness};
use esign_core::{DocumentStore, FileStore, SignatureSubmission};
use esign_crypto::{EncryptionService, StaticKeyProvider};
use esign_types::{
    AuditEvent, DocumentStatus, FieldType, RecipientStatus, SigningError, StorageRef, StorageType,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;

async fn events(h: &Harness, document_id: &str) -> Vec<AuditEvent> {
    h.service
        .audit_trail(document_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect()
}

#[tokio::test]
async fn sequential_signers_complete_and_certify() {
    let h = Harness::new();
    let doc = h
        .sent(
            vec![recipient("Alice", 1), recipient("Bob", 2)],
            vec![
                field(FieldType::Signature, 0, "Alice signature"),
                field(FieldType::Signature, 1, "Bob signature"),
            ],
        )
        .await;
    let alice = doc.recipients[0].id.clone();
    let bob = doc.recipients[1].id.clone();

    let err = h
        .service
        .record_signature(&bob, signed(), client())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SigningError::OrderViolation {
            waiting_on: vec!["alice@example.com".to_string()]
        }
    );

    let after_alice = h
        .service
        .record_signature(&alice, signed(), client())
        .await
        .unwrap();
    assert_eq!(after_alice.recipients[0].status, RecipientStatus::Signed);
    assert_eq!(after_alice.status, DocumentStatus::Sent);

    let done = h
        .service
        .record_signature(&bob, signed(), client())
        .await
        .unwrap();
    assert_eq!(done.status, DocumentStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(
        done.recipients[1].ip_address.as_deref(),
        Some("198.51.100.4")
    );

    let certificate = h.service.generate_certificate(&doc.id).await.unwrap();
    assert!(certificate.created);
    assert_eq!(certificate.record.document_hash.len(), 64);
    assert!(certificate.record.certificate_id.starts_with("CERT-"));
    assert!(certificate.pdf.starts_with(b"%PDF"));

    let again = h.service.generate_certificate(&doc.id).await.unwrap();
    assert!(!again.created);
    assert_eq!(again.record, certificate.record);

    assert_eq!(
        events(&h, &doc.id).await,
        vec![
            AuditEvent::DocumentCreated,
            AuditEvent::DocumentSent,
            AuditEvent::SignatureEncrypted,
            AuditEvent::DocumentSigned,
            AuditEvent::SignatureEncrypted,
            AuditEvent::DocumentSigned,
            AuditEvent::DocumentCompleted,
            AuditEvent::DocumentRendered,
            AuditEvent::DocumentEncrypted,
            AuditEvent::CertificateGenerated,
        ]
    );
    assert_eq!(h.service.audit().verify(&doc.id).await.unwrap(), 10);
}

#[tokio::test]
async fn decline_closes_document() {
    let h = Harness::new();
    let doc = h
        .sent(vec![recipient("Alice", 1), recipient("Bob", 2)], vec![])
        .await;
    let alice = doc.recipients[0].id.clone();
    let bob = doc.recipients[1].id.clone();

    let declined = h
        .service
        .record_decline(&alice, Some("Terms changed".to_string()), client())
        .await
        .unwrap();
    assert_eq!(declined.status, DocumentStatus::Declined);
    assert_eq!(
        declined.recipients[0].decline_reason.as_deref(),
        Some("Terms changed")
    );

    for recipient_id in [&alice, &bob] {
        let err = h
            .service
            .record_signature(recipient_id, SignatureSubmission::default(), client())
            .await
            .unwrap_err();
        assert!(matches!(err, SigningError::InvalidState(_)), "{:?}", err);
    }
    assert_eq!(
        events(&h, &doc.id).await.last(),
        Some(&AuditEvent::DocumentDeclined)
    );
}

#[tokio::test]
async fn blank_required_field_is_rejected_without_state_change() {
    let h = Harness::new();
    let doc = h
        .sent(
            vec![recipient("Alice", 1)],
            vec![
                field(FieldType::Company, 0, "Company Name"),
                field(FieldType::Signature, 0, "Signature"),
            ],
        )
        .await;
    let alice = doc.recipients[0].id.clone();
    let company = doc.fields[0].id.clone();
    let before = events(&h, &doc.id).await.len();

    let submission = SignatureSubmission {
        field_values: BTreeMap::from([(company.clone(), "  ".to_string())]),
        ..signed()
    };
    let err = h
        .service
        .record_signature(&alice, submission, client())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SigningError::validation("missing required fields: Company Name")
    );

    let stored = h.store.load(&doc.id).await.unwrap();
    assert_eq!(stored, doc);

    let trail = h.service.audit_trail(&doc.id).await.unwrap();
    assert_eq!(trail.len(), before + 1);
    let rejected = trail.last().unwrap();
    assert_eq!(rejected.event, AuditEvent::SignatureRejected);
    assert_eq!(rejected.recipient_email.as_deref(), Some("alice@example.com"));
    assert!(rejected.metadata["reason"].contains("Company Name"));

    // No sealed image was kept for the rejected attempt
    assert!(h.files.keys().await.iter().all(|k| !k.starts_with("signatures/")));

    let ok = SignatureSubmission {
        field_values: BTreeMap::from([(company, "Acme Holdings".to_string())]),
        ..signed()
    };
    let done = h.service.record_signature(&alice, ok, client()).await.unwrap();
    assert_eq!(done.status, DocumentStatus::Completed);
    assert_eq!(done.fields[0].value.as_deref(), Some("Acme Holdings"));
}

#[tokio::test]
async fn undecodable_signature_image_is_rejected() {
    let h = Harness::new();
    let doc = h
        .sent(
            vec![recipient("Alice", 1)],
            vec![field(FieldType::Signature, 0, "Signature")],
        )
        .await;

    let submission = SignatureSubmission {
        field_values: BTreeMap::new(),
        signature_image: Some("data:image/png;base64,aGVsbG8gd29ybGQ=".to_string()),
    };
    let err = h
        .service
        .record_signature(&doc.recipients[0].id, submission, client())
        .await
        .unwrap_err();

    assert!(matches!(err, SigningError::Validation(_)));
    assert_eq!(
        events(&h, &doc.id).await.last(),
        Some(&AuditEvent::SignatureRejected)
    );
    assert_eq!(
        h.store.load(&doc.id).await.unwrap().recipients[0].status,
        RecipientStatus::Sent
    );
}

#[tokio::test]
async fn truncated_png_is_rejected_before_completion() {
    let h = Harness::new();
    let doc = h
        .sent(
            vec![recipient("Alice", 1)],
            vec![field(FieldType::Signature, 0, "Signature")],
        )
        .await;

    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(b"garbage not a real png body");
    let submission = SignatureSubmission {
        field_values: BTreeMap::new(),
        signature_image: Some(format!("data:image/png;base64,{}", BASE64.encode(&bytes))),
    };
    let err = h
        .service
        .record_signature(&doc.recipients[0].id, submission, client())
        .await
        .unwrap_err();

    match err {
        SigningError::Validation(msg) => assert!(msg.contains("could not be decoded"), "{}", msg),
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(
        events(&h, &doc.id).await.last(),
        Some(&AuditEvent::SignatureRejected)
    );
    let stored = h.store.load(&doc.id).await.unwrap();
    assert_eq!(stored.recipients[0].status, RecipientStatus::Sent);
    assert_ne!(stored.status, DocumentStatus::Completed);
    assert!(h.files.keys().await.iter().all(|k| !k.starts_with("signatures/")));
}

#[tokio::test]
async fn order_and_state_failures_leave_no_audit_entry() {
    let h = Harness::new();
    let doc = h
        .sent(vec![recipient("Alice", 1), recipient("Bob", 2)], vec![])
        .await;
    let before = events(&h, &doc.id).await;

    let _ = h
        .service
        .record_signature(&doc.recipients[1].id, signed(), client())
        .await
        .unwrap_err();
    assert_eq!(events(&h, &doc.id).await, before);
}

async fn completed_and_certified(h: &Harness) -> (String, String) {
    let doc = h
        .sent(
            vec![recipient("Alice", 1)],
            vec![field(FieldType::Signature, 0, "Signature")],
        )
        .await;
    h.service
        .record_signature(&doc.recipients[0].id, signed(), client())
        .await
        .unwrap();
    let certificate = h.service.generate_certificate(&doc.id).await.unwrap();
    (doc.id, certificate.record.certificate_id)
}

#[tokio::test]
async fn certificate_verifies_until_document_is_altered() {
    let h = Harness::new();
    let (document_id, certificate_id) = completed_and_certified(&h).await;

    let verification = h.service.verify_certificate(&certificate_id).await.unwrap();
    assert!(verification.verified, "{:?}", verification.reason);

    // Replace the stored artifact with a different, validly sealed document
    let crypto = EncryptionService::new(Arc::new(StaticKeyProvider::new("test", [7u8; 32])));
    let forged = crypto
        .seal_document(&document_id, b"%PDF-1.7 forged content")
        .unwrap();
    h.files
        .put(&format!("completed/{}.pdf.sealed", document_id), forged.bytes)
        .await
        .unwrap();

    let verification = h.service.verify_certificate(&certificate_id).await.unwrap();
    assert!(!verification.verified);
    let reason = verification.reason.unwrap();
    assert!(reason.starts_with("Integrity check failed"), "{}", reason);
    assert_eq!(
        events(&h, &document_id).await.last(),
        Some(&AuditEvent::IntegrityCheckFailed)
    );
}

#[tokio::test]
async fn corrupted_ciphertext_fails_verification() {
    let h = Harness::new();
    let (document_id, certificate_id) = completed_and_certified(&h).await;

    let reference = StorageRef::new(
        StorageType::Memory,
        format!("completed/{}.pdf.sealed", document_id),
    );
    let mut bytes = h.files.fetch(&reference).await.unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x55;
    h.files.put(&reference.key, bytes).await.unwrap();

    let verification = h.service.verify_certificate(&certificate_id).await.unwrap();
    assert!(!verification.verified);
    let reason = verification.reason.unwrap();
    assert!(reason.starts_with("Integrity check failed"), "{}", reason);

    let trail = h.service.audit_trail(&document_id).await.unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.event, AuditEvent::IntegrityCheckFailed);
    assert_eq!(last.metadata["certificate_id"], certificate_id);
    assert!(matches!(
        h.service.verify_document_integrity(&document_id).await,
        Err(SigningError::Integrity(_))
    ));
}

#[tokio::test]
async fn unknown_certificate_is_not_verified() {
    let h = Harness::new();
    let verification = h
        .service
        .verify_certificate("CERT-000000000000000000000000")
        .await
        .unwrap();
    assert!(!verification.verified);
    assert_eq!(verification.reason.as_deref(), Some("certificate not found"));
}
