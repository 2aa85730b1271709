//! Authenticated encryption of payloads at rest
//!
//! XChaCha20-Poly1305: 32-byte key, random 24-byte nonce, 16-byte tag
//! appended to the ciphertext. The associated data binds a payload to its
//! purpose and owner so a sealed signature cannot be swapped for another.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::KeyProvider;

pub const ALGORITHM: &str = "XChaCha20-Poly1305";
pub const VERSION: u32 = 1;
const NONCE_LEN: usize = 24;

/// Sealed bytes plus everything needed to open them again (except the key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub algorithm: String,
    pub version: u32,
    pub key_id: String,
    /// base64
    pub nonce: String,
    /// base64 ciphertext with the tag appended
    pub ciphertext: String,
}

impl SealedPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec(self).map_err(|e| CryptoError::InvalidPayload(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidPayload(format!("sealed payload: {}", e)))
    }
}

/// Encrypt `plaintext` under the provider's active key
pub fn seal(
    keys: &dyn KeyProvider,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedPayload, CryptoError> {
    let key_id = keys.active_key_id().to_string();
    let key = keys.key(&key_id)?;
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|_| CryptoError::InvalidKey("wrong key length".into()))?;

    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::Encrypt)?;

    Ok(SealedPayload {
        algorithm: ALGORITHM.to_string(),
        version: VERSION,
        key_id,
        nonce: BASE64.encode(nonce),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Decrypt and authenticate a sealed payload
pub fn open(
    keys: &dyn KeyProvider,
    sealed: &SealedPayload,
    aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if sealed.algorithm != ALGORITHM || sealed.version != VERSION {
        return Err(CryptoError::InvalidPayload(format!(
            "unsupported scheme {} v{}",
            sealed.algorithm, sealed.version
        )));
    }

    let nonce_bytes = BASE64
        .decode(&sealed.nonce)
        .map_err(|e| CryptoError::InvalidPayload(format!("nonce: {}", e)))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(CryptoError::InvalidPayload(format!(
            "nonce must be {} bytes",
            NONCE_LEN
        )));
    }
    let ciphertext = BASE64
        .decode(&sealed.ciphertext)
        .map_err(|e| CryptoError::InvalidPayload(format!("ciphertext: {}", e)))?;

    let key = keys.key(&sealed.key_id)?;
    let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice())
        .map_err(|_| CryptoError::InvalidKey("wrong key length".into()))?;

    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(&nonce_bytes),
            Payload {
                msg: &ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Decrypt)?;

    Ok(Zeroizing::new(plaintext))
}
