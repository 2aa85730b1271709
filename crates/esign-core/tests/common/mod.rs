//! Shared fixtures for the service scenario tests

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use esign_core::{
    ClientContext, FileStore, MemoryFileStore, MemoryStore, ServiceSettings, SignatureSubmission,
    SigningService,
};
use esign_crypto::{EncryptionService, StaticKeyProvider};
use esign_types::{
    DocumentMetadata, FieldType, NewDocument, NewField, NewRecipient, RecipientRole,
    SignatureDocument, StorageRef,
};
use image::{ImageFormat, Rgba, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};

pub struct Harness {
    pub service: SigningService,
    pub store: Arc<MemoryStore>,
    pub files: Arc<MemoryFileStore>,
}

impl Harness {
    pub fn new() -> Self {
        let mut settings = ServiceSettings::default();
        settings.organization = "Acme Capital".to_string();
        settings.render_timeout = Duration::from_secs(10);
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let files = Arc::new(MemoryFileStore::new());
        let crypto = EncryptionService::new(Arc::new(StaticKeyProvider::new("test", [7u8; 32])));
        let service = SigningService::new(store.clone(), files.clone(), crypto, settings);
        Self {
            service,
            store,
            files,
        }
    }

    /// Upload a source PDF and create a draft document over it
    pub async fn create(
        &self,
        recipients: Vec<NewRecipient>,
        fields: Vec<NewField>,
        metadata: DocumentMetadata,
    ) -> SignatureDocument {
        let source: StorageRef = self.files.put("sources/agreement.pdf", pdf(2)).await.unwrap();
        self.service
            .create_document(NewDocument {
                team_id: "team-1".to_string(),
                title: "Subscription Agreement".to_string(),
                source,
                expires_at: None,
                metadata,
                recipients,
                fields,
            })
            .await
            .unwrap()
    }

    /// Create and dispatch
    pub async fn sent(&self, recipients: Vec<NewRecipient>, fields: Vec<NewField>) -> SignatureDocument {
        let doc = self.create(recipients, fields, DocumentMetadata::default()).await;
        self.service.dispatch(&doc.id).await.unwrap()
    }
}

pub fn recipient(name: &str, order: u32) -> NewRecipient {
    NewRecipient {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        role: RecipientRole::Signer,
        signing_order: order,
        required: true,
        access_code_hash: None,
    }
}

pub fn field(field_type: FieldType, recipient_index: usize, label: &str) -> NewField {
    NewField {
        field_type,
        page_number: 1,
        x: 10.0,
        y: 60.0 + recipient_index as f64 * 15.0,
        width: 35.0,
        height: 6.0,
        label: Some(label.to_string()),
        placeholder: None,
        required: true,
        recipient_index: Some(recipient_index),
        value: None,
    }
}

pub fn client() -> ClientContext {
    ClientContext::new(Some("198.51.100.4"), Some("Mozilla/5.0 (test)"))
}

/// Submission carrying only a drawn signature
pub fn signed() -> SignatureSubmission {
    SignatureSubmission {
        field_values: Default::default(),
        signature_image: Some(signature_data_url()),
    }
}

pub fn signature_data_url() -> String {
    format!("data:image/png;base64,{}", BASE64.encode(signature_png()))
}

pub fn signature_png() -> Vec<u8> {
    let img = RgbaImage::from_fn(60, 20, |x, y| {
        if y == 10 || x == y * 3 {
            Rgba([20, 20, 90, 255])
        } else {
            Rgba([255, 255, 255, 0])
        }
    });
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Letter-size PDF with `pages` pages of text
pub fn pdf(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::new();
    for n in 1..=pages {
        let content = format!("BT /F1 12 Tf 72 720 Td (Agreement page {}) Tj ET", n);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}
