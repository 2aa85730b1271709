//! Encryption service used by the signing workflow
//!
//! Wraps the AEAD with purpose-bound associated data so a sealed signature
//! image, completed document or password can only be opened in the role it
//! was sealed for.

use std::io::Cursor;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use image::{ImageFormat, ImageReader, Limits};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tracing::debug;
use zeroize::Zeroizing;

use crate::aead::{self, SealedPayload};
use crate::error::CryptoError;
use crate::keys::{sha256_hex, verify_checksum, KeyProvider};
use crate::pdf_security::{self, Permissions};

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];
const GENERATED_PASSWORD_LEN: usize = 20;
/// Largest accepted signature image side, in pixels
pub const MAX_SIGNATURE_DIMENSION: u32 = 4096;

/// Signature image after transport decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Sealed signature image ready for the file store
#[derive(Debug, Clone)]
pub struct SealedImage {
    pub payload: Vec<u8>,
    /// SHA-256 of the plaintext image
    pub checksum: String,
    pub media_type: &'static str,
}

/// Sealed completed document
#[derive(Debug, Clone)]
pub struct SealedDocument {
    pub bytes: Vec<u8>,
    /// SHA-256 of `bytes`, for integrity checks without decrypting
    pub sealed_checksum: String,
    /// SHA-256 of the plaintext PDF
    pub content_hash: String,
}

#[derive(Clone)]
pub struct EncryptionService {
    keys: Arc<dyn KeyProvider>,
}

impl EncryptionService {
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self { keys }
    }

    pub fn algorithm(&self) -> &'static str {
        aead::ALGORITHM
    }

    pub fn version(&self) -> u32 {
        aead::VERSION
    }

    pub fn active_key_id(&self) -> &str {
        self.keys.active_key_id()
    }

    /// Decode a data URL (`data:image/png;base64,...`) or bare base64 string
    pub fn decode_signature_image(encoded: &str) -> Result<DecodedImage, CryptoError> {
        let trimmed = encoded.trim();
        let body = match trimmed.strip_prefix("data:") {
            Some(rest) => {
                let (header, data) = rest.split_once(',').ok_or_else(|| {
                    CryptoError::InvalidPayload("malformed data URL".into())
                })?;
                if !header.ends_with(";base64") {
                    return Err(CryptoError::InvalidPayload(
                        "signature data URL must be base64 encoded".into(),
                    ));
                }
                data
            }
            None => trimmed,
        };

        if body.is_empty() {
            return Err(CryptoError::InvalidPayload("signature image is empty".into()));
        }

        let bytes = BASE64
            .decode(body)
            .map_err(|e| CryptoError::InvalidPayload(format!("signature image: {}", e)))?;

        let (media_type, format) = if bytes.starts_with(PNG_MAGIC) {
            ("image/png", ImageFormat::Png)
        } else if bytes.starts_with(JPEG_MAGIC) {
            ("image/jpeg", ImageFormat::Jpeg)
        } else {
            return Err(CryptoError::InvalidPayload(
                "signature image must be PNG or JPEG".into(),
            ));
        };

        let (width, height) = check_image(&bytes, format)?;
        Ok(DecodedImage {
            bytes,
            media_type,
            width,
            height,
        })
    }

    pub fn seal_signature_image(
        &self,
        owner_id: &str,
        encoded: &str,
    ) -> Result<SealedImage, CryptoError> {
        let image = Self::decode_signature_image(encoded)?;
        let checksum = sha256_hex(&image.bytes);
        let sealed = aead::seal(self.keys.as_ref(), &image.bytes, &signature_aad(owner_id))?;

        debug!(owner_id, media_type = image.media_type, "Sealed signature image");

        Ok(SealedImage {
            payload: sealed.to_bytes()?,
            checksum,
            media_type: image.media_type,
        })
    }

    /// Open a sealed signature image and check it against its recorded checksum
    pub fn open_signature_image(
        &self,
        owner_id: &str,
        payload: &[u8],
        checksum: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let sealed = SealedPayload::from_bytes(payload)?;
        let plaintext = aead::open(self.keys.as_ref(), &sealed, &signature_aad(owner_id))?;
        verify_checksum(&plaintext, checksum)?;
        Ok(plaintext)
    }

    pub fn seal_document(&self, document_id: &str, pdf: &[u8]) -> Result<SealedDocument, CryptoError> {
        let content_hash = sha256_hex(pdf);
        let bytes = aead::seal(self.keys.as_ref(), pdf, &document_aad(document_id))?.to_bytes()?;
        let sealed_checksum = sha256_hex(&bytes);

        Ok(SealedDocument {
            bytes,
            sealed_checksum,
            content_hash,
        })
    }

    pub fn open_document(&self, document_id: &str, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let payload = SealedPayload::from_bytes(sealed)?;
        let plaintext = aead::open(self.keys.as_ref(), &payload, &document_aad(document_id))?;
        Ok(plaintext.to_vec())
    }

    pub fn seal_password(&self, document_id: &str, password: &str) -> Result<Vec<u8>, CryptoError> {
        aead::seal(
            self.keys.as_ref(),
            password.as_bytes(),
            &password_aad(document_id),
        )?
        .to_bytes()
    }

    pub fn open_password(
        &self,
        document_id: &str,
        sealed: &[u8],
    ) -> Result<Zeroizing<String>, CryptoError> {
        let payload = SealedPayload::from_bytes(sealed)?;
        let plaintext = aead::open(self.keys.as_ref(), &payload, &password_aad(document_id))?;
        let password = String::from_utf8(plaintext.to_vec())
            .map_err(|_| CryptoError::InvalidPayload("password is not UTF-8".into()))?;
        Ok(Zeroizing::new(password))
    }

    /// Random alphanumeric open password
    pub fn generate_password() -> Zeroizing<String> {
        Zeroizing::new(
            OsRng
                .sample_iter(&Alphanumeric)
                .take(GENERATED_PASSWORD_LEN)
                .map(char::from)
                .collect(),
        )
    }

    /// Apply an open password and permission set to a rendered PDF.
    ///
    /// The owner password is random and discarded; nobody needs owner rights
    /// on a completed document.
    pub fn protect_pdf(
        &self,
        document_id: &str,
        pdf: &[u8],
        password: &str,
        permissions: Permissions,
    ) -> Result<Vec<u8>, CryptoError> {
        let owner = Self::generate_password();
        pdf_security::protect_pdf(pdf, password, &owner, permissions, document_id.as_bytes())
    }

    pub fn verify_checksum(&self, data: &[u8], expected: &str) -> Result<(), CryptoError> {
        verify_checksum(data, expected)
    }
}

/// Fully decode the image so a broken one is refused before anyone signs with it
fn check_image(bytes: &[u8], format: ImageFormat) -> Result<(u32, u32), CryptoError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SIGNATURE_DIMENSION);
    limits.max_image_height = Some(MAX_SIGNATURE_DIMENSION);

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(limits);
    let image = reader.decode().map_err(|e| {
        CryptoError::InvalidPayload(format!("signature image could not be decoded: {}", e))
    })?;

    if image.width() == 0 || image.height() == 0 {
        return Err(CryptoError::InvalidPayload(
            "signature image has no pixels".into(),
        ));
    }
    Ok((image.width(), image.height()))
}

fn signature_aad(owner_id: &str) -> Vec<u8> {
    format!("signature:{}", owner_id).into_bytes()
}

fn document_aad(document_id: &str) -> Vec<u8> {
    format!("document:{}", document_id).into_bytes()
}

fn password_aad(document_id: &str) -> Vec<u8> {
    format!("password:{}", document_id).into_bytes()
}
