//! Read-through caching in front of a [`MetadataStore`].

use crate::cache::Cache;
use async_trait::async_trait;
use imgpipe_core::{ImageId, ImageRecord, ImageUpdate, MetadataStore, Result, UserId};

/// Cache key for a single image record
pub fn image_key(id: &ImageId) -> String {
    format!("images:{id}")
}

/// Cache key for a user's image listing
pub fn user_images_key(user_id: &UserId) -> String {
    format!("images:user:{user_id}")
}

/// Pattern covering a user's listing and every key derived from it
pub fn user_images_pattern(user_id: &UserId) -> String {
    format!("images:user:{user_id}*")
}

/// Wraps a metadata store so reads are memoized and every mutation
/// invalidates the record key and every key under its owner's listing.
///
/// Invalidation failures are logged and do not fail the mutation; stale
/// entries then live at most one TTL.
#[derive(Debug, Clone)]
pub struct CachedMetadataStore<M> {
    inner: M,
    cache: Cache,
}

impl<M: MetadataStore> CachedMetadataStore<M> {
    pub fn new(inner: M, cache: Cache) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }

    async fn invalidate_image(&self, id: &ImageId) {
        let key = image_key(id);
        if let Err(e) = self.cache.invalidate(&key).await {
            tracing::warn!(key = %key, error = %e, "Failed to invalidate cached image metadata");
        }
    }

    async fn invalidate_record(&self, record: &ImageRecord) {
        self.invalidate_image(&record.id).await;

        let pattern = user_images_pattern(&record.user_id);
        if let Err(e) = self.cache.invalidate_pattern(&pattern).await {
            tracing::warn!(pattern = %pattern, error = %e, "Failed to invalidate cached image listings");
        }
    }
}

#[async_trait]
impl<M: MetadataStore> MetadataStore for CachedMetadataStore<M> {
    async fn get_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        self.cache
            .cache_or_fetch_default(&image_key(id), || self.inner.get_image(id))
            .await
    }

    async fn list_images(&self, user_id: &UserId) -> Result<Vec<ImageRecord>> {
        self.cache
            .cache_or_fetch_default(&user_images_key(user_id), || {
                self.inner.list_images(user_id)
            })
            .await
    }

    async fn insert_image(&self, record: ImageRecord) -> Result<ImageRecord> {
        let record = self.inner.insert_image(record).await?;
        self.invalidate_record(&record).await;
        Ok(record)
    }

    async fn update_image(&self, id: &ImageId, update: ImageUpdate) -> Result<ImageRecord> {
        let record = self.inner.update_image(id, update).await?;
        self.invalidate_record(&record).await;
        Ok(record)
    }

    async fn delete_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        let removed = self.inner.delete_image(id).await?;
        match &removed {
            Some(record) => self.invalidate_record(record).await,
            None => self.invalidate_image(id).await,
        }
        Ok(removed)
    }
}
