//! Metadata store seam holding image records.

use crate::error::{Result, StoreError};
use crate::id::{ImageId, UserId};
use crate::image::{ImageRecord, ImageUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[cfg(feature = "redis")]
pub mod redis;

/// Structured storage for image records.
///
/// `update_image` must be atomic per row; concurrent updates to the same
/// record resolve last-write-wins.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_image(&self, id: &ImageId) -> Result<Option<ImageRecord>>;

    /// All images owned by `user_id`, newest first
    async fn list_images(&self, user_id: &UserId) -> Result<Vec<ImageRecord>>;

    async fn insert_image(&self, record: ImageRecord) -> Result<ImageRecord>;

    /// Apply `update` to an existing record and return the new state
    async fn update_image(&self, id: &ImageId, update: ImageUpdate) -> Result<ImageRecord>;

    /// Remove a record, returning it if it existed
    async fn delete_image(&self, id: &ImageId) -> Result<Option<ImageRecord>>;
}

#[async_trait]
impl<T: MetadataStore + ?Sized> MetadataStore for Arc<T> {
    async fn get_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        (**self).get_image(id).await
    }

    async fn list_images(&self, user_id: &UserId) -> Result<Vec<ImageRecord>> {
        (**self).list_images(user_id).await
    }

    async fn insert_image(&self, record: ImageRecord) -> Result<ImageRecord> {
        (**self).insert_image(record).await
    }

    async fn update_image(&self, id: &ImageId, update: ImageUpdate) -> Result<ImageRecord> {
        (**self).update_image(id, update).await
    }

    async fn delete_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        (**self).delete_image(id).await
    }
}

/// In-memory metadata store (not persistent, for testing/dev)
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataStore {
    images: Arc<RwLock<HashMap<ImageId, ImageRecord>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        Ok(self.images.read().await.get(id).cloned())
    }

    async fn list_images(&self, user_id: &UserId) -> Result<Vec<ImageRecord>> {
        let images = self.images.read().await;
        let mut owned: Vec<ImageRecord> = images
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn insert_image(&self, record: ImageRecord) -> Result<ImageRecord> {
        self.images
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update_image(&self, id: &ImageId, update: ImageUpdate) -> Result<ImageRecord> {
        let mut images = self.images.write().await;
        let record = images
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply_to(record);
        Ok(record.clone())
    }

    async fn delete_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        Ok(self.images.write().await.remove(id))
    }
}
