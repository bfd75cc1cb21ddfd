use imgpipe_cache::{Cache, CachedMetadataStore, InMemoryCacheStore};
use imgpipe_cache::metadata::user_images_key;
use imgpipe_core::{
    ImageRecord, ImageStatus, ImageUpdate, InMemoryMetadataStore, MetadataStore, StoreError,
    UserId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(300);

#[tokio::test]
async fn test_second_read_within_ttl_skips_loader() {
    let cache = Cache::new(InMemoryCacheStore::new());
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Result<String, StoreError> = cache
            .cache_or_fetch(
                "users:42",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("alice".to_string())
                },
                TTL,
            )
            .await;
        assert_eq!(value.unwrap(), "alice");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_reloads() {
    let cache = Cache::new(InMemoryCacheStore::new());
    let calls = AtomicUsize::new(0);
    let load = || async {
        Ok::<_, StoreError>(calls.fetch_add(1, Ordering::SeqCst))
    };

    assert_eq!(cache.cache_or_fetch("k", load, Duration::from_secs(1)).await.unwrap(), 0);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(cache.cache_or_fetch("k", load, Duration::from_secs(1)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_loader_error_propagates_and_is_not_cached() {
    let cache = Cache::new(InMemoryCacheStore::new());

    let first: Result<u32, StoreError> = cache
        .cache_or_fetch("k", || async { Err(StoreError::unavailable("db down")) }, TTL)
        .await;
    assert!(matches!(first, Err(StoreError::Unavailable(_))));

    let second: Result<u32, StoreError> =
        cache.cache_or_fetch("k", || async { Ok(9) }, TTL).await;
    assert_eq!(second.unwrap(), 9);
}

#[tokio::test]
async fn test_pattern_invalidation_forces_reload() {
    let cache = Cache::new(InMemoryCacheStore::new());
    let calls = AtomicUsize::new(0);
    let load = || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, StoreError>(1u8)
    };

    for key in ["users:1", "users:2"] {
        cache.cache_or_fetch(key, load, TTL).await.unwrap();
    }
    cache.cache_or_fetch("images:1", load, TTL).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(cache.invalidate_pattern("users:*").await.unwrap(), 2);

    for key in ["users:1", "users:2", "images:1"] {
        cache.cache_or_fetch(key, load, TTL).await.unwrap();
    }
    // only the two invalidated keys reload
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_metadata_mutation_is_visible_to_next_read() {
    let store = CachedMetadataStore::new(
        InMemoryMetadataStore::new(),
        Cache::new(InMemoryCacheStore::new()),
    );
    let owner = UserId::new("u1");
    let record = store
        .insert_image(ImageRecord::new(owner.clone(), "uploads/a/original.png", "a.png"))
        .await
        .unwrap();

    // warm both key spaces
    let cached = store.get_image(&record.id).await.unwrap().unwrap();
    assert_eq!(cached.status, ImageStatus::Uploaded);
    assert_eq!(store.list_images(&owner).await.unwrap().len(), 1);

    store
        .update_image(&record.id, ImageUpdate::status(ImageStatus::Processed))
        .await
        .unwrap();

    let fresh = store.get_image(&record.id).await.unwrap().unwrap();
    assert_eq!(fresh.status, ImageStatus::Processed);
    let listed = store.list_images(&owner).await.unwrap();
    assert_eq!(listed[0].status, ImageStatus::Processed);

    store.delete_image(&record.id).await.unwrap();
    assert!(store.get_image(&record.id).await.unwrap().is_none());
    assert!(store.list_images(&owner).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mutation_evicts_derived_listing_keys() {
    let cache = Cache::new(InMemoryCacheStore::new());
    let store = CachedMetadataStore::new(InMemoryMetadataStore::new(), cache.clone());
    let owner = UserId::new("u1");
    let other = UserId::new("u2");

    let record = store
        .insert_image(ImageRecord::new(owner.clone(), "uploads/a/original.png", "a.png"))
        .await
        .unwrap();

    let page = format!("{}:page:2", user_images_key(&owner));
    let foreign = format!("{}:page:2", user_images_key(&other));
    for key in [&page, &foreign] {
        cache.set(key, &vec![record.id.clone()], TTL).await.unwrap();
    }

    store
        .update_image(&record.id, ImageUpdate::status(ImageStatus::Processing))
        .await
        .unwrap();

    assert!(cache.get::<Vec<String>>(&page).await.unwrap().is_none());
    assert!(cache.get::<Vec<String>>(&foreign).await.unwrap().is_some());
}
