//! Lock-free service metrics.
//!
//! Counters are relaxed atomics; the timing rings take a `try_lock` and drop
//! the sample when contended. Nothing in this crate may block a request
//! path, and losing an isolated increment under a race is acceptable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maximum samples retained per timing ring; overflow trims the oldest.
pub const TIMING_RING_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// TimingRing
// ---------------------------------------------------------------------------

/// Bounded ring of elapsed-time samples (milliseconds).
#[derive(Debug, Default)]
pub struct TimingRing {
    samples: Mutex<VecDeque<f64>>,
}

impl TimingRing {
    /// Record one elapsed duration. Drops the sample if the ring is locked.
    pub fn record(&self, elapsed: Duration) {
        if let Ok(mut samples) = self.samples.try_lock() {
            if samples.len() == TIMING_RING_CAPACITY {
                samples.pop_front();
            }
            samples.push_back(elapsed.as_secs_f64() * 1000.0);
        }
    }

    /// Mean of the retained samples, or `None` when empty.
    pub fn average_ms(&self) -> Option<f64> {
        let samples = self.samples.lock().ok()?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Shared metric registry. One instance lives in the daemon `AppState`.
#[derive(Debug, Default)]
pub struct Metrics {
    webhook_duplicates: AtomicU64,
    deadlock_retries: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Latency ring for hold creation.
    pub hold_creation: TimingRing,
    /// Latency ring for webhook processing.
    pub webhook_processing: TimingRing,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_webhook_duplicate(&self) {
        self.webhook_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_deadlock_retry(&self) {
        self.deadlock_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn webhook_duplicates(&self) -> u64 {
        self.webhook_duplicates.load(Ordering::Relaxed)
    }

    pub fn deadlock_retries(&self) -> u64 {
        self.deadlock_retries.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot for the metrics endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            webhook_duplicates: self.webhook_duplicates.load(Ordering::Relaxed),
            deadlock_retries: self.deadlock_retries.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            hold_creation_avg_ms: self.hold_creation.average_ms(),
            hold_creation_samples: self.hold_creation.len(),
            webhook_processing_avg_ms: self.webhook_processing.average_ms(),
            webhook_processing_samples: self.webhook_processing.len(),
        }
    }
}

/// JSON shape returned by GET /metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub webhook_duplicates: u64,
    pub deadlock_retries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hold_creation_avg_ms: Option<f64>,
    pub hold_creation_samples: usize,
    pub webhook_processing_avg_ms: Option<f64>,
    pub webhook_processing_samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_trims_oldest_beyond_capacity() {
        let ring = TimingRing::default();
        for _ in 0..TIMING_RING_CAPACITY {
            ring.record(Duration::from_millis(10));
        }
        assert_eq!(ring.len(), TIMING_RING_CAPACITY);

        // One more sample with a distinct value: capacity holds, oldest gone.
        ring.record(Duration::from_millis(1010));
        assert_eq!(ring.len(), TIMING_RING_CAPACITY);
        let avg = ring.average_ms().expect("ring is non-empty");
        assert!(avg > 10.0, "average should reflect the new sample: {avg}");
    }

    #[test]
    fn ring_average_is_mean_of_samples() {
        let ring = TimingRing::default();
        ring.record(Duration::from_millis(10));
        ring.record(Duration::from_millis(30));
        let avg = ring.average_ms().expect("two samples");
        assert!((avg - 20.0).abs() < 0.01, "avg = {avg}");
    }

    #[test]
    fn empty_ring_has_no_average() {
        let ring = TimingRing::default();
        assert!(ring.average_ms().is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.incr_webhook_duplicate();
        m.incr_webhook_duplicate();
        m.incr_deadlock_retry();
        m.incr_cache_hit();
        m.incr_cache_miss();

        let snap = m.snapshot();
        assert_eq!(snap.webhook_duplicates, 2);
        assert_eq!(snap.deadlock_retries, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.hold_creation_samples, 0);
        assert!(snap.hold_creation_avg_ms.is_none());
    }
}
