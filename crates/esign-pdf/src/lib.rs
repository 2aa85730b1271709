//! PDF rendering for the signing workflow
//!
//! Maps normalized field boxes onto pages, burns field values and signature
//! images into a copy of the source PDF, and lays out the standalone
//! completion certificate.

pub mod certificate;
pub mod coords;
pub mod document;
pub mod error;
pub mod layout;
pub mod raster;
pub mod renderer;
pub mod text;

pub use certificate::{render_certificate, CertificateContent, CertificateSigner};
pub use coords::{fit_image, map_field, PageBox, PdfRect};
pub use document::PdfDocument;
pub use error::RenderError;
pub use renderer::{format_timestamp, render_document, RenderOptions};
