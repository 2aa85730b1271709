//! At-rest encryption for the signing workflow
//!
//! Authenticated encryption of signature images, completed documents and
//! unlock passwords, SHA-256 checksums, and PDF open-password protection.

pub mod aead;
pub mod error;
pub mod keys;
pub mod pdf_security;
pub mod service;

pub use aead::{SealedPayload, ALGORITHM, VERSION};
pub use error::CryptoError;
pub use keys::{sha256_hex, verify_checksum, KeyProvider, StaticKeyProvider, KEY_LEN};
pub use pdf_security::{Permission, Permissions};
pub use service::{DecodedImage, EncryptionService, SealedDocument, SealedImage};
