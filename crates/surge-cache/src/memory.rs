//! In-memory cache backend.
//!
//! A `HashMap` behind a tokio `RwLock`, with per-entry expiry instants.
//! Expired entries are dropped lazily on access; there is no background
//! cleanup task; the working set is a handful of product snapshots with a
//! 10-second TTL, so lazy reaping is sufficient.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::RwLock;

use crate::CacheStore;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory TTL store. Default backend, and the one tests run against.
#[derive(Debug, Default)]
pub struct MemoryCache {
    store: RwLock<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let store = self.store.read().await;
        store.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // Write lock so an expired entry can be reaped on the way out.
        let mut store = self.store.write().await;
        match store.get(key) {
            Some(entry) if entry.is_expired() => {
                store.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.store.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn forget_many(&self, keys: &[String]) -> Result<()> {
        let mut store = self.store.write().await;
        for key in keys {
            store.remove(key);
        }
        Ok(())
    }
}
