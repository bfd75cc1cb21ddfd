//! Blob store seam holding raw image bytes.

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Object storage for source and derived image bytes.
///
/// Implementations must make `put` atomic per object: readers observe either
/// the previous bytes or the new bytes, never a partial write.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Store `data` under `key`, replacing any previous object
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

/// In-memory blob store (not persistent, for testing/dev)
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type recorded for `key`, if present.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()?
            .get(key)
            .map(|o| o.content_type.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| StoreError::unavailable("Lock poisoned"))?;
        objects
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StoreError::unavailable("Lock poisoned"))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}

/// Blob store backed by a local directory.
///
/// Keys are relative paths below `root`. Writes go to a sibling temp file and
/// are renamed into place.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(key, bytes = data.len(), "Stored blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_missing() {
        let store = InMemoryBlobStore::new();
        store
            .put("uploads/a.png", Bytes::from_static(b"abc"), "image/png")
            .await
            .unwrap();

        assert_eq!(store.get("uploads/a.png").await.unwrap(), "abc");
        assert_eq!(store.content_type("uploads/a.png").as_deref(), Some("image/png"));
        assert!(store.get("uploads/b.png").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_fs_store_writes_nested_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("uploads/img-1/resized-10x10.png", Bytes::from_static(b"px"), "image/png")
            .await
            .unwrap();

        let data = store.get("uploads/img-1/resized-10x10.png").await.unwrap();
        assert_eq!(&data[..], b"px");
        assert!(dir.path().join("uploads/img-1/resized-10x10.png").exists());
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        for key in ["../etc/passwd", "/abs/path", "a/../../b", ""] {
            let err = store.get(key).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidKey(_)), "key {key:?}");
        }
    }
}
