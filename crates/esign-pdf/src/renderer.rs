//! Burns field values and signature images into the source PDF

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use esign_types::{DocumentStatus, Field, FieldType, Recipient, SignatureDocument};
use lopdf::ObjectId;
use tracing::{debug, warn};

use crate::coords::{fit_image, map_field, PdfRect};
use crate::document::PdfDocument;
use crate::error::RenderError;
use crate::layout::{append_text_pages, PageWriter};
use crate::raster::EmbeddedImage;
use crate::text::{font_size_for, text_op, truncate_to_width};

const TEXT_INSET: f64 = 2.0;
/// Bottom band of the final page that holds the signer strip
const STRIP_BAND: f64 = 72.0;
const STRIP_INSET: f64 = 18.0;
const STRIP_FONT: f64 = 6.5;
const STRIP_LEADING: f64 = 8.5;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Upper bound for text field font size, in points
    pub text_cap_pt: f64,
    /// Add the signer strip to completed documents
    pub certificate_strip: bool,
    /// Printed on the signer summary when already known
    pub certificate_id: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            text_cap_pt: 12.0,
            certificate_strip: true,
            certificate_id: None,
        }
    }
}

/// What a field contributes to the page
#[derive(Debug, Clone, PartialEq)]
enum FieldContent {
    Text(String),
    Check,
    Signature(usize),
    /// Has a value that draws nothing (unchecked checkbox)
    Blank,
    Skip,
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn is_checked(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "checked" | "x" | "yes" | "on"
    )
}

fn signed<'a>(recipient: Option<&'a Recipient>) -> Option<&'a Recipient> {
    recipient.filter(|r| r.is_signed())
}

fn resolve_field(
    document: &SignatureDocument,
    field: &Field,
    signatures: &HashMap<String, Vec<u8>>,
) -> Result<FieldContent, RenderError> {
    let recipient = field
        .recipient_index
        .and_then(|i| document.recipients.get(i));
    let value = field
        .value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let content = match field.field_type {
        FieldType::Signature | FieldType::Initials => match (field.recipient_index, signed(recipient)) {
            (Some(index), Some(r)) if signatures.contains_key(&r.id) => {
                Some(FieldContent::Signature(index))
            }
            (_, Some(r)) if field.required => {
                return Err(RenderError::MissingSignature(r.email.clone()));
            }
            _ => None,
        },
        FieldType::Checkbox => value.map(|v| {
            if is_checked(v) {
                FieldContent::Check
            } else {
                FieldContent::Blank
            }
        }),
        FieldType::DateSigned => value.map(str::to_string).or_else(|| {
            signed(recipient)
                .and_then(|r| r.signed_at)
                .map(|at| at.format("%Y-%m-%d").to_string())
        })
        .map(FieldContent::Text),
        FieldType::Name => value
            .map(str::to_string)
            .or_else(|| signed(recipient).map(|r| r.name.clone()))
            .map(FieldContent::Text),
        FieldType::Email => value
            .map(str::to_string)
            .or_else(|| signed(recipient).map(|r| r.email.clone()))
            .map(FieldContent::Text),
        _ => value.map(|v| FieldContent::Text(v.to_string())),
    };

    // Fields of optional recipients who never signed stay empty
    let required = field.required && recipient.map_or(true, |r| r.is_required());
    match content {
        Some(content) => Ok(content),
        None if required => Err(RenderError::MissingRequiredValue {
            field_id: field.id.clone(),
        }),
        None => Ok(FieldContent::Skip),
    }
}

fn draw_text(ops: &mut String, rect: &PdfRect, text: &str, cap: f64) {
    let size = font_size_for(rect.height, cap);
    if size < 1.0 {
        return;
    }
    let inner = rect.inset(TEXT_INSET);
    let fitted = truncate_to_width(text, size, inner.width);
    // Vertically centered; baseline sits about a fifth of the size above the bottom
    let baseline = rect.y + (rect.height - size) / 2.0 + size * 0.2;

    ops.push_str(&clip(rect));
    ops.push_str(&text_op(inner.x, baseline, size, &fitted));
    ops.push_str("Q\n");
}

fn draw_check(ops: &mut String, rect: &PdfRect) {
    let side = rect.width.min(rect.height);
    let pad = side * 0.2;
    let x1 = rect.x + (rect.width - side) / 2.0 + pad;
    let y1 = rect.y + (rect.height - side) / 2.0 + pad;
    let x2 = x1 + side - 2.0 * pad;
    let y2 = y1 + side - 2.0 * pad;

    ops.push_str(&format!(
        "q 0 G {:.2} w {:.2} {:.2} m {:.2} {:.2} l S {:.2} {:.2} m {:.2} {:.2} l S Q\n",
        (side * 0.1).max(0.5),
        x1,
        y1,
        x2,
        y2,
        x1,
        y2,
        x2,
        y1
    ));
}

fn draw_image(ops: &mut String, rect: &PdfRect, name: &str, image: &EmbeddedImage) {
    let fitted = fit_image(rect, image.width, image.height);
    ops.push_str(&format!(
        "q {:.2} 0 0 {:.2} {:.2} {:.2} cm /{} Do Q\n",
        fitted.width, fitted.height, fitted.x, fitted.y, name
    ));
}

fn clip(rect: &PdfRect) -> String {
    format!(
        "q {:.2} {:.2} {:.2} {:.2} re W n\n",
        rect.x, rect.y, rect.width, rect.height
    )
}

fn image_name(recipient_index: usize) -> String {
    format!("EsSig{}", recipient_index)
}

/// Render every field value onto a copy of `source`.
///
/// `signatures` maps recipient ids to decrypted signature image bytes.
/// The source bytes are never modified.
pub fn render_document(
    document: &SignatureDocument,
    source: &[u8],
    signatures: &HashMap<String, Vec<u8>>,
    options: &RenderOptions,
) -> Result<Vec<u8>, RenderError> {
    let mut pdf = PdfDocument::from_bytes(source)?;

    let mut by_page: BTreeMap<u32, Vec<&Field>> = BTreeMap::new();
    for field in &document.fields {
        by_page.entry(field.page_number).or_default().push(field);
    }

    // Decoded and embedded once per recipient, shared across pages
    let mut embedded: HashMap<usize, (ObjectId, EmbeddedImage)> = HashMap::new();

    for (page_number, fields) in by_page {
        let page_id = pdf.page_id(page_number)?;
        let page_box = pdf.page_box(page_number)?;
        let mut ops = String::new();
        let mut uses_font = false;

        for field in fields {
            let content = resolve_field(document, field, signatures)?;
            if matches!(content, FieldContent::Skip | FieldContent::Blank) {
                continue;
            }

            let Some(rect) = map_field(&page_box, field.x, field.y, field.width, field.height)
            else {
                warn!(field_id = %field.id, page = page_number, "Field lies outside the page, skipping");
                continue;
            };

            match content {
                FieldContent::Text(text) => {
                    draw_text(&mut ops, &rect, &text, options.text_cap_pt);
                    uses_font = true;
                }
                FieldContent::Check => draw_check(&mut ops, &rect),
                FieldContent::Signature(index) => {
                    if !embedded.contains_key(&index) {
                        let recipient = &document.recipients[index];
                        let bytes = signatures
                            .get(&recipient.id)
                            .ok_or_else(|| RenderError::MissingSignature(recipient.email.clone()))?;
                        let image = EmbeddedImage::decode(bytes).map_err(|reason| {
                            RenderError::InvalidImage {
                                recipient: recipient.email.clone(),
                                reason,
                            }
                        })?;
                        let id = pdf.embed_image(&image);
                        embedded.insert(index, (id, image));
                    }
                    if let Some((id, image)) = embedded.get(&index) {
                        let name = image_name(index);
                        pdf.use_xobject(page_id, &name, *id)?;
                        draw_image(&mut ops, &rect, &name, image);
                    }
                }
                FieldContent::Blank | FieldContent::Skip => {}
            }
        }

        if ops.is_empty() {
            continue;
        }
        if uses_font {
            pdf.add_font(page_id)?;
        }
        debug!(page = page_number, bytes = ops.len(), "Overlaying fields");
        pdf.overlay(page_id, ops.into_bytes())?;
    }

    if document.status == DocumentStatus::Completed && options.certificate_strip {
        let last = pdf.page_count();
        let size = pdf.page_box(last)?;
        match margin_strip(document, options, size) {
            Some(ops) => {
                let page_id = pdf.page_id(last)?;
                pdf.add_font(page_id)?;
                debug!(page = last, "Drawing signer strip in bottom margin");
                pdf.overlay(page_id, ops.into_bytes())?;
            }
            None => {
                debug!(page = last, "Signer strip does not fit the margin, appending summary");
                let pages = signer_summary(document, options, size);
                append_text_pages(&mut pdf, size, pages)?;
            }
        }
    }

    pdf.save_to_bytes()
}

fn strip_lines(document: &SignatureDocument, options: &RenderOptions) -> Vec<String> {
    let mut header = format!("Signed electronically | Document ID {}", document.id);
    if let Some(certificate_id) = &options.certificate_id {
        header.push_str(&format!(" | Certificate {}", certificate_id));
    }

    let mut lines = vec![header];
    for recipient in document.recipients.iter().filter(|r| r.is_signed()) {
        let signed_at = recipient
            .signed_at
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string());
        let ip = recipient.ip_address.as_deref().unwrap_or("unknown");
        lines.push(format!(
            "{} <{}> | Signed {} | IP {}",
            recipient.name, recipient.email, signed_at, ip
        ));
    }
    lines
}

/// Compact signer strip for the final page's bottom margin.
///
/// `None` when the signers do not fit the band; the caller falls back to
/// appended summary pages.
fn margin_strip(
    document: &SignatureDocument,
    options: &RenderOptions,
    page: crate::coords::PageBox,
) -> Option<String> {
    let lines = strip_lines(document, options);
    let needed = lines.len() as f64 * STRIP_LEADING + 4.0;
    let width = page.width - 2.0 * STRIP_INSET;
    if needed > STRIP_BAND - STRIP_INSET / 2.0 || width <= 0.0 {
        return None;
    }

    let left = page.x + STRIP_INSET;
    let top = page.y + STRIP_INSET / 2.0 + needed;
    let mut ops = format!(
        "q 0.6 G 0.5 w {:.2} {:.2} m {:.2} {:.2} l S Q\n",
        left,
        top,
        left + width,
        top
    );
    let mut y = top - 4.0;
    for line in lines {
        y -= STRIP_LEADING;
        let fitted = truncate_to_width(&line, STRIP_FONT, width);
        ops.push_str(&text_op(left, y + 2.0, STRIP_FONT, &fitted));
    }
    Some(ops)
}

/// Signer summary drawn on pages appended after the document
fn signer_summary(
    document: &SignatureDocument,
    options: &RenderOptions,
    size: crate::coords::PageBox,
) -> Vec<String> {
    let mut writer = PageWriter::new(size, 48.0);
    writer.line("Signature Summary", 16.0);
    writer.rule();
    writer.line(&format!("Document: {}", document.title), 10.0);
    writer.line(&format!("Document ID: {}", document.id), 10.0);
    if let Some(certificate_id) = &options.certificate_id {
        writer.line(&format!("Certificate: {}", certificate_id), 10.0);
    }
    if let Some(completed_at) = document.completed_at {
        writer.line(&format!("Completed: {}", format_timestamp(completed_at)), 10.0);
    }
    writer.gap(8.0);

    for recipient in document.recipients.iter().filter(|r| r.is_signed()) {
        writer.line(&format!("{} <{}>", recipient.name, recipient.email), 10.0);
        let signed_at = recipient
            .signed_at
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string());
        let ip = recipient.ip_address.as_deref().unwrap_or("unknown");
        writer.indented(&format!("Signed {} | IP {}", signed_at, ip), 9.0, 12.0);
        writer.gap(4.0);
    }

    writer.gap(8.0);
    writer.paragraph(
        "This summary is provided for convenience. The completion certificate is the record used for verification.",
        8.0,
        0.0,
    );
    writer.into_pages()
}
