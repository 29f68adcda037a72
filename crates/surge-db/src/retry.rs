//! Bounded retry for contention errors.
//!
//! Transactions touching contended product or hold rows can deadlock with
//! each other despite the Product → Hold lock ordering. The wrapper re-runs
//! the whole transaction closure with exponential backoff; anything that is
//! not contention propagates untouched on the first attempt.

use std::future::Future;
use std::time::Duration;

use surge_metrics::Metrics;
use tracing::{debug, warn};

use crate::error::CoordError;

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: u32 = 3;
/// Backoff is BASE_DELAY_MS * 2^(attempt - 1).
pub const BASE_DELAY_MS: u64 = 10;

/// Run `f` until it succeeds, fails with a non-contention error, or the
/// attempt budget is spent. Each retry increments the deadlock-retry
/// counter and sleeps before re-running.
pub async fn retry_on_contention<T, F, Fut>(
    op: &'static str,
    metrics: &Metrics,
    mut f: F,
) -> Result<T, CoordError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoordError>>,
{
    let mut attempt = 1u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(CoordError::Contention(err)) if attempt < MAX_ATTEMPTS => {
                metrics.incr_deadlock_retry();
                let delay_ms = BASE_DELAY_MS * 2u64.pow(attempt - 1);
                debug!(op, attempt, delay_ms, error = %err, "contention; retrying after backoff");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            Err(CoordError::Contention(err)) => {
                warn!(op, attempts = attempt, error = %err, "contention retry budget exhausted");
                return Err(CoordError::ContentionExhausted { op });
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn contention() -> CoordError {
        // Variant-level classification is what the wrapper dispatches on;
        // the carried source error is irrelevant here.
        CoordError::Contention(sqlx::Error::PoolTimedOut)
    }

    #[tokio::test]
    async fn succeeds_after_transient_contention() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);

        let result = retry_on_contention("test_op", &metrics, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(contention())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.deadlock_retries(), 2);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_on_contention("test_op", &metrics, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(contention()) }
        })
        .await;

        match result {
            Err(CoordError::ContentionExhausted { op }) => assert_eq!(op, "test_op"),
            other => panic!("expected ContentionExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert_eq!(metrics.deadlock_retries(), u64::from(MAX_ATTEMPTS - 1));
    }

    #[tokio::test]
    async fn non_contention_propagates_immediately() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_on_contention("test_op", &metrics, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoordError::bad_request("Insufficient stock available")) }
        })
        .await;

        assert!(matches!(result, Err(CoordError::BadRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry for domain errors");
        assert_eq!(metrics.deadlock_retries(), 0);
    }
}
