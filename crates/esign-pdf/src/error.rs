use esign_types::SigningError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to parse PDF: {0}")]
    Parse(String),

    #[error("Failed to write PDF: {0}")]
    Write(String),

    #[error("Page {0} not found")]
    PageNotFound(u32),

    #[error("Malformed page structure: {0}")]
    Structure(String),

    #[error("Signature image for {recipient} could not be decoded: {reason}")]
    InvalidImage { recipient: String, reason: String },

    /// A required field reached rendering without a value
    #[error("Required field {field_id} has no value")]
    MissingRequiredValue { field_id: String },

    #[error("No signature image for {0}")]
    MissingSignature(String),
}

impl From<lopdf::Error> for RenderError {
    fn from(err: lopdf::Error) -> Self {
        RenderError::Structure(err.to_string())
    }
}

impl From<RenderError> for SigningError {
    fn from(err: RenderError) -> Self {
        SigningError::Render(err.to_string())
    }
}
