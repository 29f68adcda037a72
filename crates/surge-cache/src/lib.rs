//! String-keyed TTL cache with pluggable backends.
//!
//! The cache is advisory: it holds short-lived available-stock snapshots and
//! nothing the service depends on for correctness. Every operation is
//! best-effort: callers go through the `*_best_effort` helpers, which log
//! failures and fall through to the authoritative database path.
//!
//! Backends: in-memory (default, and what tests use), Redis (external
//! store), and no-op (cache provably switched off).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

pub mod memory;
pub mod noop;
pub mod redis_store;

pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use redis_store::RedisCache;

/// TTL for available-stock snapshots.
pub const STOCK_SNAPSHOT_TTL: Duration = Duration::from_secs(10);

/// Cache key for a product's available-stock snapshot.
pub fn stock_key(product_id: i64) -> String {
    format!("product_{product_id}_available_stock")
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Object-safe cache operations. Values are strings; the stock snapshot is
/// the integer's decimal form.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn has(&self, key: &str) -> Result<bool>;

    /// Store `value` under `key` for `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove a single entry. Removing an absent key succeeds.
    async fn forget(&self, key: &str) -> Result<()>;

    /// Remove a batch of entries. Absent keys are skipped silently.
    async fn forget_many(&self, keys: &[String]) -> Result<()>;
}

/// Shared handle passed through constructors (never a global facade).
pub type SharedCache = Arc<dyn CacheStore>;

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

pub const ENV_CACHE_BACKEND: &str = "SURGE_CACHE_BACKEND";
pub const ENV_CACHE_REDIS_URL: &str = "SURGE_CACHE_REDIS_URL";

/// Build the cache backend selected by `SURGE_CACHE_BACKEND`:
/// `memory` (default) | `redis` | `none`.
pub async fn from_env() -> Result<SharedCache> {
    let backend = std::env::var(ENV_CACHE_BACKEND).unwrap_or_else(|_| "memory".to_string());
    match backend.as_str() {
        "memory" => Ok(Arc::new(MemoryCache::new())),
        "none" => Ok(Arc::new(NoopCache)),
        "redis" => {
            let url = std::env::var(ENV_CACHE_REDIS_URL).map_err(|_| {
                anyhow::anyhow!("{ENV_CACHE_BACKEND}=redis requires {ENV_CACHE_REDIS_URL}")
            })?;
            let store = RedisCache::connect(&url).await?;
            Ok(Arc::new(store))
        }
        other => Err(anyhow::anyhow!(
            "unknown {ENV_CACHE_BACKEND} value: {other} (expected memory | redis | none)"
        )),
    }
}

// ---------------------------------------------------------------------------
// Best-effort wrappers
// ---------------------------------------------------------------------------

/// Read through the cache; a backend failure is logged and reads as a miss.
pub async fn get_best_effort(cache: &SharedCache, key: &str) -> Option<String> {
    match cache.get(key).await {
        Ok(value) => value,
        Err(err) => {
            warn!(key, error = %err, "cache get failed; falling back to database");
            None
        }
    }
}

/// Store a value; a backend failure is logged and ignored.
pub async fn put_best_effort(cache: &SharedCache, key: &str, value: &str, ttl: Duration) {
    if let Err(err) = cache.put(key, value, ttl).await {
        warn!(key, error = %err, "cache put failed; continuing without snapshot");
    }
}

/// Invalidate one entry; a backend failure is logged and ignored.
pub async fn forget_best_effort(cache: &SharedCache, key: &str) {
    if let Err(err) = cache.forget(key).await {
        warn!(key, error = %err, "cache forget failed; entry will age out via TTL");
    }
}

/// Invalidate a batch of entries; a backend failure is logged and ignored.
pub async fn forget_many_best_effort(cache: &SharedCache, keys: &[String]) {
    if let Err(err) = cache.forget_many(keys).await {
        warn!(
            count = keys.len(),
            error = %err,
            "cache batch forget failed; entries will age out via TTL"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_key_format_is_stable() {
        assert_eq!(stock_key(42), "product_42_available_stock");
    }
}
