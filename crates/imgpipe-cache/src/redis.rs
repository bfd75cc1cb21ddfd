use crate::error::{CacheError, Result};
use crate::store::CacheStore;
use async_trait::async_trait;
use redis::{aio::Connection, AsyncCommands, Client};
use std::time::Duration;

const SCAN_BATCH: usize = 200;

/// Redis-backed cache store.
///
/// Entries are written with `SET .. PX` so expiry is enforced by Redis.
/// Pattern deletes walk the keyspace with `SCAN MATCH` rather than `KEYS`.
#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    client: Client,
}

impl RedisCacheStore {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<Connection> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;

        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: usize = conn
            .del(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            if !keys.is_empty() {
                let deleted: usize = conn
                    .del(&keys)
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::debug!(pattern, removed, "Deleted cache keys by pattern");
        Ok(removed)
    }
}
