//! Filesystem blob storage

use async_trait::async_trait;
use esign_core::FileStore;
use esign_types::{Result, SigningError, StorageRef, StorageType};
use std::path::{Component, Path, PathBuf};

/// Stores blobs under a root directory, one file per key
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(SigningError::validation(format!(
                "invalid storage key: {}",
                key
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn fetch(&self, reference: &StorageRef) -> Result<Vec<u8>> {
        if reference.storage_type != StorageType::Local {
            return Err(SigningError::storage(format!(
                "unsupported storage reference: {}",
                reference
            )));
        }
        let path = self.resolve(&reference.key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SigningError::not_found(reference.key.clone()),
            _ => SigningError::storage(format!("read {}: {}", reference.key, e)),
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<StorageRef> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SigningError::storage(format!("create {}: {}", parent.display(), e)))?;
        }

        // Write then rename so readers never see a partial blob
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| SigningError::storage(format!("write {}: {}", key, e)))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| SigningError::storage(format!("rename {}: {}", key, e)))?;

        Ok(StorageRef::new(StorageType::Local, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("esign-files-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_put_and_fetch() {
        let root = temp_root();
        let store = LocalFileStore::new(&root);

        let reference = store
            .put("completed/doc-1.pdf.sealed", b"sealed".to_vec())
            .await
            .unwrap();
        assert_eq!(reference.storage_type, StorageType::Local);
        assert_eq!(store.fetch(&reference).await.unwrap(), b"sealed");

        store
            .put("completed/doc-1.pdf.sealed", b"replaced".to_vec())
            .await
            .unwrap();
        assert_eq!(store.fetch(&reference).await.unwrap(), b"replaced");

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let store = LocalFileStore::new(temp_root());
        for key in ["../etc/passwd", "/abs/path", "a/../../b", ""] {
            let err = store.put(key, vec![1]).await.unwrap_err();
            assert!(matches!(err, SigningError::Validation(_)), "{}", key);
        }
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = LocalFileStore::new(temp_root());
        let reference = StorageRef::new(StorageType::Local, "sources/missing.pdf");
        assert!(matches!(
            store.fetch(&reference).await,
            Err(SigningError::NotFound(_))
        ));
    }
}
