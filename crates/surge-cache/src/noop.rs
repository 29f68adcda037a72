//! No-op cache backend.
//!
//! Every read misses and every write succeeds. Substituting this backend
//! must not change any HTTP response body, only latency. Tests use it to
//! prove the cache is an unobservable optimization.

use std::time::Duration;

use anyhow::Result;

use crate::CacheStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait::async_trait]
impl CacheStore for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn has(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn put(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn forget(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn forget_many(&self, _keys: &[String]) -> Result<()> {
        Ok(())
    }
}
