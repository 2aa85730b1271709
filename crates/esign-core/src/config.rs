//! Service configuration
//!
//! Loaded from an optional TOML file (`ESIGN_CONFIG`), then overridden by
//! environment variables. Every section has defaults so an empty file is a
//! valid configuration.

use anyhow::Context;
use esign_crypto::StaticKeyProvider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsignConfig {
    #[serde(default)]
    pub organization: OrganizationConfig,
    #[serde(default)]
    pub rendering: RenderingConfig,
    #[serde(default)]
    pub certificate: CertificateConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    /// Printed at the top of completion certificates
    #[serde(default = "default_org_name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingConfig {
    /// Upper bound for fetching and rendering a final document
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
    /// Font size cap for text fields, in points
    #[serde(default = "default_text_cap")]
    pub text_cap_pt: f64,
    #[serde(default = "default_true")]
    pub certificate_strip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    /// Number of trailing audit events printed on the certificate
    #[serde(default = "default_audit_excerpt")]
    pub audit_excerpt: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default = "default_key_id")]
    pub key_id: String,
    /// base64, 32 bytes once decoded; prefer the environment over the file
    #[serde(default, skip_serializing)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_storage_dir")]
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_org_name() -> String {
    "E-Sign".to_string()
}

fn default_render_timeout() -> u64 {
    30
}

fn default_text_cap() -> f64 {
    12.0
}

fn default_true() -> bool {
    true
}

fn default_audit_excerpt() -> usize {
    12
}

fn default_key_id() -> String {
    "primary".to_string()
}

fn default_database_url() -> String {
    "sqlite:esign.db?mode=rwc".to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_port() -> u16 {
    3001
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            name: default_org_name(),
        }
    }
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_render_timeout(),
            text_cap_pt: default_text_cap(),
            certificate_strip: true,
        }
    }
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            audit_excerpt: default_audit_excerpt(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            key_id: default_key_id(),
            key: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            directory: default_storage_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl EsignConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("Failed to parse TOML configuration")
    }

    /// File named by `ESIGN_CONFIG` (if any), then process environment
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("ESIGN_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override values from an environment lookup
    pub fn apply_env<F>(&mut self, get: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = get("ESIGN_ORG_NAME") {
            self.organization.name = name;
        }
        if let Some(key) = get("ESIGN_ENCRYPTION_KEY") {
            self.encryption.key = Some(key);
        }
        if let Some(key_id) = get("ESIGN_KEY_ID") {
            self.encryption.key_id = key_id;
        }
        if let Some(secs) = get("ESIGN_RENDER_TIMEOUT_SECS") {
            self.rendering.timeout_secs = secs
                .parse()
                .with_context(|| format!("ESIGN_RENDER_TIMEOUT_SECS is not a number: {}", secs))?;
        }
        if let Some(cap) = get("ESIGN_TEXT_CAP_PT") {
            self.rendering.text_cap_pt = cap
                .parse()
                .with_context(|| format!("ESIGN_TEXT_CAP_PT is not a number: {}", cap))?;
        }
        if let Some(count) = get("ESIGN_AUDIT_EXCERPT") {
            self.certificate.audit_excerpt = count
                .parse()
                .with_context(|| format!("ESIGN_AUDIT_EXCERPT is not a number: {}", count))?;
        }
        if let Some(url) = get("DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(dir) = get("ESIGN_STORAGE_DIR") {
            self.storage.directory = PathBuf::from(dir);
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("PORT is not a valid port: {}", port))?;
        }

        if self.rendering.text_cap_pt <= 0.0 {
            anyhow::bail!("text_cap_pt must be positive");
        }
        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.rendering.timeout_secs)
    }

    /// Key provider for the encryption service.
    ///
    /// Without a configured key an ephemeral one is generated; anything
    /// sealed with it is unreadable after a restart.
    pub fn key_provider(&self) -> anyhow::Result<StaticKeyProvider> {
        match &self.encryption.key {
            Some(encoded) => StaticKeyProvider::from_base64(&self.encryption.key_id, encoded)
                .context("ESIGN_ENCRYPTION_KEY is invalid"),
            None => {
                warn!("No encryption key configured, generating an ephemeral key");
                Ok(StaticKeyProvider::generate(&self.encryption.key_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esign_crypto::KeyProvider;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = EsignConfig::from_str("").unwrap();
        assert_eq!(config.organization.name, "E-Sign");
        assert_eq!(config.rendering.timeout_secs, 30);
        assert_eq!(config.rendering.text_cap_pt, 12.0);
        assert_eq!(config.certificate.audit_excerpt, 12);
        assert_eq!(config.server.port, 3001);
        assert!(config.encryption.key.is_none());
    }

    #[test]
    fn test_toml_sections() {
        let toml = r#"
            [organization]
            name = "Acme Capital"

            [rendering]
            timeout_secs = 5
            certificate_strip = false

            [certificate]
            audit_excerpt = 4
        "#;
        let config = EsignConfig::from_str(toml).unwrap();
        assert_eq!(config.organization.name, "Acme Capital");
        assert_eq!(config.render_timeout(), Duration::from_secs(5));
        assert!(!config.rendering.certificate_strip);
        assert_eq!(config.rendering.text_cap_pt, 12.0);
        assert_eq!(config.certificate.audit_excerpt, 4);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ESIGN_ORG_NAME", "Env Org"),
            ("ESIGN_RENDER_TIMEOUT_SECS", "9"),
            ("ESIGN_KEY_ID", "k7"),
            ("PORT", "8080"),
            ("ESIGN_STORAGE_DIR", "/tmp/esign"),
        ]);
        let mut config = EsignConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.organization.name, "Env Org");
        assert_eq!(config.rendering.timeout_secs, 9);
        assert_eq!(config.encryption.key_id, "k7");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.directory, PathBuf::from("/tmp/esign"));
    }

    #[test]
    fn test_bad_env_value_rejected() {
        let mut config = EsignConfig::default();
        let result = config.apply_env(|k| (k == "PORT").then(|| "not-a-port".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_key_provider_from_config() {
        let mut config = EsignConfig::default();
        config.encryption.key = Some("AQIDBAUGBwgJCgsMDQ4PEBESExQVFhcYGRobHB0eHyA=".to_string());
        let provider = config.key_provider().unwrap();
        assert_eq!(provider.active_key_id(), "primary");
        assert_eq!(provider.key("primary").unwrap()[0], 1);

        config.encryption.key = Some("c2hvcnQ=".to_string());
        assert!(config.key_provider().is_err());
    }
}
