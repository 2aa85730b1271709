//! Key material and digests
//!
//! Keys are handed to the encryption service through [`KeyProvider`];
//! nothing in this crate reads process environment or configuration.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;

/// Compute SHA-256 of arbitrary bytes
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute SHA-256 and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Compare a recorded checksum against freshly computed bytes
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), CryptoError> {
    let actual = sha256_hex(data);
    if constant_time_eq(actual.as_bytes(), expected.to_ascii_lowercase().as_bytes()) {
        Ok(())
    } else {
        Err(CryptoError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Constant-time comparison to prevent timing side channels.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Source of symmetric keys for the encryption service
pub trait KeyProvider: Send + Sync {
    /// Key id used for new payloads
    fn active_key_id(&self) -> &str;

    /// Resolve a key by id (old ids stay resolvable after rotation)
    fn key(&self, key_id: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError>;
}

/// In-process key ring
pub struct StaticKeyProvider {
    active: String,
    keys: HashMap<String, Zeroizing<[u8; KEY_LEN]>>,
}

impl StaticKeyProvider {
    pub fn new(key_id: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        let key_id = key_id.into();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), Zeroizing::new(key));
        Self {
            active: key_id,
            keys,
        }
    }

    /// Decode a base64 key (32 bytes once decoded)
    pub fn from_base64(key_id: impl Into<String>, encoded: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded.trim())
                .map_err(|e| CryptoError::InvalidKey(format!("not base64: {}", e)))?,
        );
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        let provider = Self::new(key_id, key);
        zeroize::Zeroize::zeroize(&mut key);
        Ok(provider)
    }

    /// Fresh random key; for tests and ephemeral deployments
    pub fn generate(key_id: impl Into<String>) -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let provider = Self::new(key_id, key);
        zeroize::Zeroize::zeroize(&mut key);
        provider
    }

    /// Keep an older key resolvable for decryption
    pub fn with_retired_key(mut self, key_id: impl Into<String>, key: [u8; KEY_LEN]) -> Self {
        self.keys.insert(key_id.into(), Zeroizing::new(key));
        self
    }
}

impl KeyProvider for StaticKeyProvider {
    fn active_key_id(&self) -> &str {
        &self.active
    }

    fn key(&self, key_id: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
        self.keys
            .get(key_id)
            .map(|k| Zeroizing::new(**k))
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))
    }
}
