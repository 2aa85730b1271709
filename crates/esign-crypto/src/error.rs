use esign_types::SigningError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Unknown key id: {0}")]
    UnknownKey(String),

    #[error("Encryption failed")]
    Encrypt,

    /// Wrong key, wrong associated data, or a modified ciphertext
    #[error("Decryption failed: payload could not be authenticated")]
    Decrypt,

    #[error("Malformed payload: {0}")]
    InvalidPayload(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("PDF security handler failed: {0}")]
    Pdf(String),
}

impl From<CryptoError> for SigningError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::ChecksumMismatch { .. } | CryptoError::Decrypt => {
                SigningError::Integrity(err.to_string())
            }
            CryptoError::InvalidPayload(msg) => SigningError::Validation(msg),
            other => SigningError::Encryption(other.to_string()),
        }
    }
}
