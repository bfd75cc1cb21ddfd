use crate::error::Result;
use crate::store::CacheStore;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live for memoized values
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cache-aside front over a [`CacheStore`].
///
/// Store failures never fail a read: a broken cache degrades to calling the
/// loader every time.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    default_ttl: Duration,
}

impl Cache {
    pub fn new<S: CacheStore + 'static>(store: S) -> Self {
        Self::from_arc(Arc::new(store))
    }

    pub fn from_arc(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            default_ttl: DEFAULT_TTL,
        }
    }

    /// Set the TTL used by [`Cache::cache_or_fetch_default`]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the cached value for `key`, or run `loader`, store its result
    /// for `ttl` and return it.
    ///
    /// Loader errors propagate unchanged and nothing is cached for them.
    /// An entry that fails to deserialize is treated as a miss.
    pub async fn cache_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    tracing::trace!(key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => tracing::warn!(key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => tracing::trace!(key, "Cache miss"),
            Err(e) => tracing::warn!(key, error = %e, "Cache read failed, falling back to loader"),
        }

        let value = loader().await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.store.set(key, raw, ttl).await {
                    tracing::warn!(key, error = %e, "Cache write failed");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "Value not cacheable"),
        }

        Ok(value)
    }

    /// [`Cache::cache_or_fetch`] with the configured default TTL
    pub async fn cache_or_fetch_default<T, E, F, Fut>(
        &self,
        key: &str,
        loader: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.cache_or_fetch(key, loader, self.default_ttl).await
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, raw, ttl).await
    }

    /// Drop a single key. Returns whether it was present.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let removed = self.store.delete(key).await?;
        tracing::debug!(key, removed, "Invalidated cache key");
        Ok(removed)
    }

    /// Drop every key matching `pattern`, e.g. `users:*`.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        let removed = self.store.delete_matching(pattern).await?;
        tracing::debug!(pattern, removed, "Invalidated cache pattern");
        Ok(removed)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::memory::InMemoryCacheStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(CacheError::Backend("down".into()))
        }
        async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
            Err(CacheError::Backend("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(CacheError::Backend("down".into()))
        }
        async fn delete_matching(&self, _pattern: &str) -> Result<usize> {
            Err(CacheError::Backend("down".into()))
        }
    }

    #[tokio::test]
    async fn test_broken_store_falls_back_to_loader() {
        let cache = Cache::new(BrokenStore);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: std::result::Result<u32, String> = cache
                .cache_or_fetch_default("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = InMemoryCacheStore::new();
        store
            .set("k", "not json".into(), DEFAULT_TTL)
            .await
            .unwrap();
        let cache = Cache::new(store);

        let value: std::result::Result<Vec<u8>, String> = cache
            .cache_or_fetch_default("k", || async { Ok(vec![1, 2]) })
            .await;
        assert_eq!(value, Ok(vec![1, 2]));
        assert_eq!(cache.get::<Vec<u8>>("k").await.unwrap(), Some(vec![1, 2]));
    }
}
