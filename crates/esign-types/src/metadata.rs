//! Typed document metadata
//!
//! Known business flags and encryption sub-metadata are validated strictly;
//! any other key is carried through untouched in `extensions`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::document::StorageRef;
use crate::error::SigningError;

const KEY_TRIGGER_KYC: &str = "trigger_kyc_on_completion";
const KEY_PASSWORD_PROTECT: &str = "require_password_protection";
const KEY_ENCRYPTION: &str = "encryption";

/// Business switches set by the caller at creation time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessFlags {
    /// Ask the onboarding collaborator to start KYC once everyone has signed
    #[serde(default)]
    pub trigger_kyc_on_completion: bool,
    /// Protect the completed PDF with an open password
    #[serde(default)]
    pub require_password_protection: bool,
}

/// Where and how the completed artifact is sealed at rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub version: u32,
    pub key_id: String,
    /// Sealed completed document
    pub completed_document: StorageRef,
    /// SHA-256 of the sealed bytes as stored
    pub sealed_checksum: String,
    /// SHA-256 of the final PDF (after password protection, before sealing)
    pub content_hash: String,
    #[serde(default)]
    pub password_protected: bool,
    /// Sealed unlock password, when one was generated or supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<StorageRef>,
    pub sealed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub flags: BusinessFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionMetadata>,
    /// Unknown keys, passed through opaquely
    #[serde(default)]
    pub extensions: BTreeMap<String, Value>,
}

impl DocumentMetadata {
    /// Build metadata from a free-form map supplied by a caller.
    ///
    /// Known keys must have the expected type; everything else lands in
    /// `extensions`.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, SigningError> {
        let mut metadata = DocumentMetadata::default();

        for (key, value) in map {
            match key.as_str() {
                KEY_TRIGGER_KYC => {
                    metadata.flags.trigger_kyc_on_completion = expect_bool(&key, &value)?;
                }
                KEY_PASSWORD_PROTECT => {
                    metadata.flags.require_password_protection = expect_bool(&key, &value)?;
                }
                KEY_ENCRYPTION => {
                    let encryption: EncryptionMetadata =
                        serde_json::from_value(value).map_err(|e| {
                            SigningError::validation(format!("metadata '{}': {}", key, e))
                        })?;
                    metadata.encryption = Some(encryption);
                }
                _ => {
                    metadata.extensions.insert(key, value);
                }
            }
        }

        Ok(metadata)
    }

    /// Flatten back into the free-form representation
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map: Map<String, Value> = self
            .extensions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        map.insert(
            KEY_TRIGGER_KYC.to_string(),
            Value::Bool(self.flags.trigger_kyc_on_completion),
        );
        map.insert(
            KEY_PASSWORD_PROTECT.to_string(),
            Value::Bool(self.flags.require_password_protection),
        );
        if let Some(encryption) = &self.encryption {
            if let Ok(value) = serde_json::to_value(encryption) {
                map.insert(KEY_ENCRYPTION.to_string(), value);
            }
        }
        map
    }
}

fn expect_bool(key: &str, value: &Value) -> Result<bool, SigningError> {
    value
        .as_bool()
        .ok_or_else(|| SigningError::validation(format!("metadata '{}' must be a boolean", key)))
}
