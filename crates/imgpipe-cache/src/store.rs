use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Raw key/value storage behind a [`Cache`](crate::Cache).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries are reported as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` for `ttl`
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove one key. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key matching a glob `pattern` (`*` and `?`).
    /// Returns the number of keys removed.
    async fn delete_matching(&self, pattern: &str) -> Result<usize>;
}
