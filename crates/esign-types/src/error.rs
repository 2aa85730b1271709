//! Error taxonomy shared by every layer of the signing workflow

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// Operation attempted from a state that forbids it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Signer attempted to act before every earlier required signer finished
    #[error("Waiting on an earlier signer: {}", waiting_on.join(", "))]
    OrderViolation { waiting_on: Vec<String> },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A recomputed hash or checksum does not match the recorded one
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Encryption failure: {0}")]
    Encryption(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl SigningError {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OrderViolation { .. } | Self::Timeout(_) | Self::Storage(_)
        )
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::OrderViolation { .. } => "order_violation",
            Self::Validation(_) => "validation",
            Self::Integrity(_) => "integrity",
            Self::Encryption(_) => "encryption",
            Self::Storage(_) => "storage",
            Self::NotFound(_) => "not_found",
            Self::Render(_) => "render",
            Self::Timeout(_) => "timeout",
        }
    }
}

pub type Result<T> = std::result::Result<T, SigningError>;
