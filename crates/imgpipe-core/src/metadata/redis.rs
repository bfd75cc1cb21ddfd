use super::MetadataStore;
use crate::error::{Result, StoreError};
use crate::id::{ImageId, UserId};
use crate::image::{ImageRecord, ImageUpdate};
use async_trait::async_trait;
use redis::{aio::Connection, AsyncCommands, Client};

const MAX_UPDATE_ATTEMPTS: usize = 16;

/// Redis-backed metadata store shared by every process of a deployment.
///
/// Layout under `prefix`:
/// - `<prefix>:image:<id>` JSON record
/// - `<prefix>:owner:<userId>` set of image ids
///
/// Updates are optimistic `WATCH`/`MULTI` transactions on the record key,
/// retried when another writer got there first.
#[derive(Debug, Clone)]
pub struct RedisMetadataStore {
    client: Client,
    prefix: String,
}

impl RedisMetadataStore {
    pub fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = Client::open(url).map_err(unavailable)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn image_key(&self, id: &ImageId) -> String {
        format!("{}:image:{id}", self.prefix)
    }

    fn owner_key(&self, user_id: &UserId) -> String {
        format!("{}:owner:{user_id}", self.prefix)
    }

    async fn connection(&self) -> Result<Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(unavailable)
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::unavailable(e.to_string())
}

#[async_trait]
impl MetadataStore for RedisMetadataStore {
    async fn get_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.image_key(id)).await.map_err(unavailable)?;

        match raw {
            Some(json_str) => Ok(Some(serde_json::from_str(&json_str)?)),
            None => Ok(None),
        }
    }

    async fn list_images(&self, user_id: &UserId) -> Result<Vec<ImageRecord>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .smembers(self.owner_key(user_id))
            .await
            .map_err(unavailable)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .into_iter()
            .map(|id| self.image_key(&ImageId::new(id)))
            .collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let mut owned = Vec::with_capacity(raw.len());
        for json_str in raw.into_iter().flatten() {
            let record: ImageRecord = serde_json::from_str(&json_str)?;
            if &record.user_id == user_id {
                owned.push(record);
            }
        }
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }

    async fn insert_image(&self, record: ImageRecord) -> Result<ImageRecord> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&record)?;

        redis::pipe()
            .atomic()
            .set(self.image_key(&record.id), payload)
            .ignore()
            .sadd(self.owner_key(&record.user_id), record.id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(record)
    }

    async fn update_image(&self, id: &ImageId, update: ImageUpdate) -> Result<ImageRecord> {
        let mut conn = self.connection().await?;
        let key = self.image_key(id);

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(unavailable)?;

            let raw: Option<String> = conn.get(&key).await.map_err(unavailable)?;
            let Some(json_str) = raw else {
                redis::cmd("UNWATCH")
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(unavailable)?;
                return Err(StoreError::NotFound(id.to_string()));
            };

            let mut record: ImageRecord = serde_json::from_str(&json_str)?;
            update.apply_to(&mut record);
            let payload = serde_json::to_string(&record)?;

            // nil from EXEC means the watched key changed underneath us
            let committed: Option<()> = redis::pipe()
                .atomic()
                .set(&key, payload)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            if committed.is_some() {
                return Ok(record);
            }
            tracing::debug!(image_id = %id, "Concurrent image update, retrying");
        }

        Err(StoreError::unavailable(format!(
            "update of image {id} kept conflicting with other writers"
        )))
    }

    async fn delete_image(&self, id: &ImageId) -> Result<Option<ImageRecord>> {
        let mut conn = self.connection().await?;
        let key = self.image_key(id);
        let raw: Option<String> = conn.get(&key).await.map_err(unavailable)?;
        let Some(json_str) = raw else {
            return Ok(None);
        };
        let record: ImageRecord = serde_json::from_str(&json_str)?;

        redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .srem(self.owner_key(&record.user_id), id.as_str())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(Some(record))
    }
}
