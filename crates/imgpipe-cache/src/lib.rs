//! Cache-aside layer for imgpipe.
//!
//! Values are stored as serialized JSON snapshots with a time-to-live. There
//! is no write-through path: every mutation of an underlying entity must be
//! followed by invalidation of each key space that may have memoized it.
//!
//! ```rust,ignore
//! use imgpipe_cache::{Cache, InMemoryCacheStore};
//! use std::time::Duration;
//!
//! let cache = Cache::new(InMemoryCacheStore::new());
//! let user = cache
//!     .cache_or_fetch("users:42", || load_user(42), Duration::from_secs(300))
//!     .await?;
//! cache.invalidate_pattern("users:*").await?;
//! ```

pub mod cache;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod pattern;
pub mod store;

#[cfg(feature = "redis")]
pub mod redis;

pub use cache::Cache;
pub use error::{CacheError, Result};
pub use memory::InMemoryCacheStore;
pub use metadata::CachedMetadataStore;
pub use store::CacheStore;

#[cfg(feature = "redis")]
pub use crate::redis::RedisCacheStore;
