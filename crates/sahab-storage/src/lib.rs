//! Local filesystem object store
//!
//! Blob backend behind the `ObjectStore` contract: streaming reads and
//! writes under a hashed directory layout so one bucket never piles every
//! object into a single directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sahab_core::{Error, Result};
use sahab_crypto::sha256_hash;
use sahab_metadata::{ObjectReader, ObjectStore};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct FsObjectStore {
    data_dir: PathBuf,
}

impl FsObjectStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        info!("Object store initialized at {:?}", self.data_dir);
        Ok(())
    }

    /// Verify the data directory is writable.
    pub async fn health_check(&self) -> Result<()> {
        let test_file = self.data_dir.join(".health_check");
        match fs::write(&test_file, "ok").await {
            Ok(_) => {
                let _ = fs::remove_file(&test_file).await;
                Ok(())
            }
            Err(e) => Err(Error::StorageError(format!("Storage not writable: {}", e))),
        }
    }

    fn blob_path(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|part| part == "..") {
            return Err(Error::InvalidArgument(format!(
                "invalid object path: {}",
                path
            )));
        }
        // Hash prefix keeps directory fan-out bounded
        let hash = sha256_hash(path.as_bytes());
        Ok(self
            .data_dir
            .join(&hash[..2])
            .join(&hash))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, path: &str) -> Result<(ObjectReader, u64)> {
        let blob = self.blob_path(path)?;
        let file = fs::File::open(&blob)
            .await
            .map_err(|_| Error::StorageError(format!("no such blob: {}", path)))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| Error::StorageError(e.to_string()))?
            .len();
        debug!(path, size, "Opened blob for read");
        Ok((Box::new(file), size))
    }

    async fn put(&self, path: &str, mut reader: ObjectReader, size: u64) -> Result<()> {
        let blob = self.blob_path(path)?;
        if let Some(parent) = blob.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&blob).await?;
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.sync_all().await?;

        if size > 0 && written != size {
            return Err(Error::StorageError(format!(
                "short write for {}: expected {} bytes, got {}",
                path, size, written
            )));
        }
        debug!(path, written, "Stored blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    async fn store() -> (FsObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.init().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, _dir) = store().await;

        let data = b"hello world".to_vec();
        store
            .put("t1/photos/a.jpg", Box::new(Cursor::new(data.clone())), 11)
            .await
            .unwrap();

        let (mut reader, size) = store.get("t1/photos/a.jpg").await.unwrap();
        assert_eq!(size, 11);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let (store, _dir) = store().await;
        assert!(store.get("t1/photos/missing").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (store, _dir) = store().await;
        let err = store
            .put("t1/../../etc/passwd", Box::new(Cursor::new(vec![1])), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_short_write_detected() {
        let (store, _dir) = store().await;
        let err = store
            .put("t1/b/k", Box::new(Cursor::new(vec![1, 2, 3])), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
    }
}
