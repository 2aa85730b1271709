//! Application state for the e-sign API

use anyhow::Result;
use esign_core::{
    EsignConfig, FileStore, MemoryFileStore, MemoryStore, ServiceSettings, SigningService,
};
use esign_crypto::{EncryptionService, KeyProvider};
use std::sync::Arc;

use crate::files::LocalFileStore;
use crate::sqlite::SqliteStore;

pub struct AppState {
    pub service: SigningService,
    /// Where uploaded source PDFs are written
    pub files: Arc<dyn FileStore>,
}

impl AppState {
    pub async fn new(config: &EsignConfig) -> Result<Self> {
        let store = SqliteStore::connect(&config.storage.database_url).await?;
        tokio::fs::create_dir_all(&config.storage.directory).await?;
        let files: Arc<dyn FileStore> =
            Arc::new(LocalFileStore::new(config.storage.directory.clone()));

        let keys: Arc<dyn KeyProvider> = Arc::new(config.key_provider()?);
        let service = SigningService::new(
            Arc::new(store),
            files.clone(),
            EncryptionService::new(keys),
            ServiceSettings::from_config(config),
        );
        Ok(Self { service, files })
    }

    /// Everything in memory, for tests
    pub fn in_memory(keys: Arc<dyn KeyProvider>, settings: ServiceSettings) -> Self {
        let files: Arc<dyn FileStore> = Arc::new(MemoryFileStore::new());
        let service = SigningService::new(
            Arc::new(MemoryStore::new()),
            files.clone(),
            EncryptionService::new(keys),
            settings,
        );
        Self { service, files }
    }
}
