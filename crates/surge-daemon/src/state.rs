//! Shared runtime state for surge-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The database pool is
//! the only authoritative shared state; the cache handle is advisory and
//! passed explicitly (never a global facade).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use surge_cache::SharedCache;
use surge_metrics::Metrics;

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub pool: PgPool,
    pub cache: SharedCache,
    pub metrics: Arc<Metrics>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, cache: SharedCache) -> Self {
        Self {
            pool,
            cache,
            metrics: Arc::new(Metrics::new()),
            build: BuildInfo {
                service: "surge-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
