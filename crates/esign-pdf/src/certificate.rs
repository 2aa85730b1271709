//! Completion certificate PDF layout

use chrono::{DateTime, Utc};

use crate::coords::PageBox;
use crate::document::PdfDocument;
use crate::error::RenderError;
use crate::layout::{append_text_pages, PageWriter};
use crate::renderer::format_timestamp;

const MARGIN: f64 = 54.0;

/// One participant's evidence as printed on the certificate
#[derive(Debug, Clone)]
pub struct CertificateSigner {
    pub name: String,
    pub email: String,
    pub role: String,
    pub status: String,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Everything printed on a completion certificate
#[derive(Debug, Clone)]
pub struct CertificateContent {
    pub organization: String,
    pub certificate_id: String,
    pub document_id: String,
    pub document_title: String,
    pub completed_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    /// SHA-256 (hex) of the final rendered document
    pub document_hash: String,
    pub signers: Vec<CertificateSigner>,
    /// Most recent audit events, oldest first
    pub audit_excerpt: Vec<String>,
    pub audit_total: usize,
}

fn or_dash(value: Option<DateTime<Utc>>) -> String {
    value.map(format_timestamp).unwrap_or_else(|| "-".to_string())
}

/// Render the certificate as a standalone PDF
pub fn render_certificate(content: &CertificateContent) -> Result<Vec<u8>, RenderError> {
    let size = PageBox::letter();
    let mut writer = PageWriter::new(size, MARGIN);

    writer.line(&content.organization, 11.0);
    writer.line("Certificate of Completion", 20.0);
    writer.rule();
    writer.line(&format!("Certificate ID: {}", content.certificate_id), 10.0);
    writer.line(&format!("Document: {}", content.document_title), 10.0);
    writer.line(&format!("Document ID: {}", content.document_id), 10.0);
    writer.line(
        &format!("Completed: {}", format_timestamp(content.completed_at)),
        10.0,
    );
    writer.line(
        &format!("Issued: {}", format_timestamp(content.generated_at)),
        10.0,
    );

    writer.gap(6.0);
    writer.line("Document SHA-256", 10.0);
    writer.indented(&content.document_hash, 8.0, 12.0);

    writer.gap(10.0);
    writer.line("Signers", 13.0);
    writer.rule();
    for signer in &content.signers {
        writer.line(
            &format!("{} <{}> | {} | {}", signer.name, signer.email, signer.role, signer.status),
            10.0,
        );
        writer.indented(&format!("Viewed: {}", or_dash(signer.viewed_at)), 9.0, 12.0);
        writer.indented(&format!("Signed: {}", or_dash(signer.signed_at)), 9.0, 12.0);
        writer.indented(
            &format!("IP address: {}", signer.ip_address.as_deref().unwrap_or("-")),
            9.0,
            12.0,
        );
        if let Some(user_agent) = &signer.user_agent {
            writer.paragraph(&format!("User agent: {}", user_agent), 8.0, 12.0);
        }
        writer.gap(6.0);
    }

    writer.gap(6.0);
    writer.line(
        &format!(
            "Audit Trail (last {} of {} events)",
            content.audit_excerpt.len(),
            content.audit_total
        ),
        13.0,
    );
    writer.rule();
    for line in &content.audit_excerpt {
        writer.paragraph(line, 8.0, 0.0);
    }

    writer.gap(12.0);
    writer.paragraph(
        "To verify this certificate, recompute the SHA-256 of the stored signed document and compare it with the value above.",
        8.0,
        0.0,
    );

    let mut pdf = PdfDocument::blank();
    append_text_pages(&mut pdf, size, writer.into_pages())?;
    pdf.save_to_bytes()
}
