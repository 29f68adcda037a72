//! Behavioral tests for the in-memory and no-op cache backends.
//!
//! The Redis backend is exercised by the daemon's DB-gated scenarios when
//! `SURGE_CACHE_REDIS_URL` is set; nothing here needs external services.

use std::sync::Arc;
use std::time::Duration;

use surge_cache::{
    forget_best_effort, forget_many_best_effort, get_best_effort, put_best_effort, stock_key,
    CacheStore, MemoryCache, NoopCache, SharedCache,
};

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn memory_put_get_roundtrip() {
    let cache = MemoryCache::new();
    cache
        .put("product_1_available_stock", "7", Duration::from_secs(10))
        .await
        .expect("put");

    let value = cache.get("product_1_available_stock").await.expect("get");
    assert_eq!(value.as_deref(), Some("7"));
    assert!(cache.has("product_1_available_stock").await.expect("has"));
}

#[tokio::test]
async fn memory_entries_expire_after_ttl() {
    let cache = MemoryCache::new();
    cache
        .put("short", "1", Duration::from_millis(20))
        .await
        .expect("put");

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(cache.get("short").await.expect("get"), None);
    assert!(!cache.has("short").await.expect("has"));
    assert!(cache.is_empty().await, "expired entry should be reaped");
}

#[tokio::test]
async fn memory_forget_removes_entry() {
    let cache = MemoryCache::new();
    cache
        .put("k", "v", Duration::from_secs(10))
        .await
        .expect("put");
    cache.forget("k").await.expect("forget");
    assert_eq!(cache.get("k").await.expect("get"), None);

    // Forgetting an absent key is not an error.
    cache.forget("k").await.expect("forget absent");
}

#[tokio::test]
async fn memory_forget_many_removes_batch() {
    let cache = MemoryCache::new();
    for id in 1..=3i64 {
        cache
            .put(&stock_key(id), "5", Duration::from_secs(10))
            .await
            .expect("put");
    }

    let keys: Vec<String> = vec![stock_key(1), stock_key(2), stock_key(99)];
    cache.forget_many(&keys).await.expect("forget_many");

    assert_eq!(cache.get(&stock_key(1)).await.expect("get"), None);
    assert_eq!(cache.get(&stock_key(2)).await.expect("get"), None);
    assert_eq!(cache.get(&stock_key(3)).await.expect("get").as_deref(), Some("5"));
}

#[tokio::test]
async fn memory_put_overwrites_existing_entry() {
    let cache = MemoryCache::new();
    cache
        .put("k", "old", Duration::from_secs(10))
        .await
        .expect("put");
    cache
        .put("k", "new", Duration::from_secs(10))
        .await
        .expect("overwrite");
    assert_eq!(cache.get("k").await.expect("get").as_deref(), Some("new"));
}

// ---------------------------------------------------------------------------
// NoopCache
// ---------------------------------------------------------------------------

#[tokio::test]
async fn noop_always_misses_and_never_fails() {
    let cache = NoopCache;
    cache
        .put("k", "v", Duration::from_secs(10))
        .await
        .expect("put");
    assert_eq!(cache.get("k").await.expect("get"), None);
    assert!(!cache.has("k").await.expect("has"));
    cache.forget("k").await.expect("forget");
    cache
        .forget_many(&["a".to_string(), "b".to_string()])
        .await
        .expect("forget_many");
}

// ---------------------------------------------------------------------------
// Best-effort helpers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn best_effort_helpers_pass_through() {
    let cache: SharedCache = Arc::new(MemoryCache::new());

    put_best_effort(&cache, "k", "9", Duration::from_secs(10)).await;
    assert_eq!(get_best_effort(&cache, "k").await.as_deref(), Some("9"));

    forget_best_effort(&cache, "k").await;
    assert_eq!(get_best_effort(&cache, "k").await, None);

    forget_many_best_effort(&cache, &["k".to_string()]).await;
}
