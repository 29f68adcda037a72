//! Inventory side of the coordination core: the available-stock view and
//! the hold manager (create, release, expiry sweep).
//!
//! All availability decisions for one product are linearized by the
//! exclusive lock on that product's row inside `create_hold`; two
//! concurrent requests can never both read an availability that ignores
//! the other's uncommitted hold. Requests for different products proceed
//! in parallel.

use std::time::Instant;

use chrono::{Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use surge_cache::{forget_best_effort, forget_many_best_effort, stock_key, SharedCache};
use surge_db::{retry_on_contention, CoordError, HoldRow};
use surge_metrics::Metrics;
use tracing::info;

/// Holds reserve stock for this long.
pub const HOLD_TTL_SECS: i64 = 120;

// ---------------------------------------------------------------------------
// Available-stock view
// ---------------------------------------------------------------------------

/// stock minus the active-hold sum, clamped at zero.
pub fn clamped_available(stock: i32, reserved: i64) -> i64 {
    (i64::from(stock) - reserved).max(0)
}

/// Authoritative availability read. Never consults the cache; returns
/// `None` when the product does not exist.
pub async fn available_stock(pool: &PgPool, product_id: i64) -> Result<Option<i64>, CoordError> {
    let Some(product) = surge_db::product_by_id(pool, product_id).await? else {
        return Ok(None);
    };
    let reserved = surge_db::active_hold_quantity(pool, product_id).await?;
    Ok(Some(clamped_available(product.stock, reserved)))
}

/// Same computation on the transaction's connection, for callers that
/// already hold the product row lock.
pub async fn available_stock_locked(
    conn: &mut sqlx::PgConnection,
    stock: i32,
    product_id: i64,
) -> Result<i64, CoordError> {
    let reserved = surge_db::active_hold_quantity(&mut *conn, product_id).await?;
    Ok(clamped_available(stock, reserved))
}

// ---------------------------------------------------------------------------
// Hold creation
// ---------------------------------------------------------------------------

/// Reserve `quantity` units of a product for `HOLD_TTL_SECS`.
///
/// Runs under the contention-retry wrapper; on success the product's stock
/// snapshot is invalidated and the elapsed time lands in the hold-creation
/// timing ring.
pub async fn create_hold(
    pool: &PgPool,
    cache: &SharedCache,
    metrics: &Metrics,
    product_id: i64,
    quantity: i32,
) -> Result<HoldRow, CoordError> {
    let started = Instant::now();

    let hold = retry_on_contention("create_hold", metrics, || {
        create_hold_tx(pool, product_id, quantity)
    })
    .await?;

    forget_best_effort(cache, &stock_key(product_id)).await;
    metrics.hold_creation.record(started.elapsed());

    info!(
        hold_id = hold.id,
        product_id,
        quantity,
        expires_at = %hold.expires_at,
        "hold created"
    );
    Ok(hold)
}

/// One attempt: lock the product row, check availability under the lock,
/// insert the hold. Rolls back on any failure.
async fn create_hold_tx(
    pool: &PgPool,
    product_id: i64,
    quantity: i32,
) -> Result<HoldRow, CoordError> {
    let mut tx = pool.begin().await?;

    let product = surge_db::lock_product(&mut tx, product_id)
        .await?
        .ok_or(CoordError::NotFound("product"))?;

    let available = available_stock_locked(&mut tx, product.stock, product_id).await?;
    if i64::from(quantity) > available {
        return Err(CoordError::bad_request("Insufficient stock available"));
    }

    let expires_at = Utc::now() + Duration::seconds(HOLD_TTL_SECS);
    let hold = surge_db::insert_hold(&mut tx, product_id, quantity, expires_at).await?;

    tx.commit().await?;
    Ok(hold)
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

/// Return a hold to the active pool (`is_used = false`) on the caller's
/// transaction. Used only when a payment fails; the caller invalidates the
/// product's cache entry after commit.
pub async fn release_hold_on(
    conn: &mut sqlx::PgConnection,
    hold_id: i64,
) -> Result<(), CoordError> {
    let touched = surge_db::set_hold_used(&mut *conn, hold_id, false).await?;
    if touched == 0 {
        return Err(CoordError::NotFound("hold"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Expiry sweep
// ---------------------------------------------------------------------------

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Holds actually transitioned to used by this sweep.
    pub expired: u64,
    /// Distinct products whose availability changed.
    pub product_ids: Vec<i64>,
}

/// Mark every past-due unused hold as used and invalidate the touched
/// products' snapshots.
///
/// The flip carries an `is_used = false` guard, so `sweep; sweep` has the
/// same effect as one sweep. Runs under the retry wrapper: a concurrent
/// `create_order` may hold locks on rows the sweep updates.
pub async fn process_expired_holds(
    pool: &PgPool,
    cache: &SharedCache,
    metrics: &Metrics,
) -> Result<SweepReport, CoordError> {
    let transitioned = retry_on_contention("process_expired_holds", metrics, || {
        surge_db::expire_due_holds(pool)
    })
    .await?;

    let mut product_ids: Vec<i64> = transitioned.iter().map(|(_, pid)| *pid).collect();
    product_ids.sort_unstable();
    product_ids.dedup();

    let keys: Vec<String> = product_ids.iter().map(|id| stock_key(*id)).collect();
    forget_many_best_effort(cache, &keys).await;

    let report = SweepReport {
        expired: transitioned.len() as u64,
        product_ids,
    };
    if report.expired > 0 {
        info!(
            expired = report.expired,
            product_ids = ?report.product_ids,
            "expired holds processed"
        );
    }
    Ok(report)
}

/// The hold's expiry as ISO-8601, the form API responses carry.
pub fn expires_at_iso(hold: &HoldRow) -> String {
    hold.expires_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_available_subtracts_and_clamps() {
        assert_eq!(clamped_available(10, 0), 10);
        assert_eq!(clamped_available(10, 4), 6);
        assert_eq!(clamped_available(10, 10), 0);
        // Oversubscription (possible transiently between sweep ticks after a
        // payment-failure release) still reads as zero, never negative.
        assert_eq!(clamped_available(10, 12), 0);
    }

    #[test]
    fn expiry_iso_renders_utc_seconds() {
        let hold = HoldRow {
            id: 1,
            product_id: 1,
            quantity: 1,
            expires_at: chrono::DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
                .expect("valid timestamp")
                .with_timezone(&Utc),
            is_used: false,
            created_at: Utc::now(),
        };
        assert_eq!(expires_at_iso(&hold), "2026-03-01T12:00:00Z");
    }

}
