//! Payment side of the coordination core: the order manager and the
//! idempotent webhook processor.
//!
//! Double-submits on one hold are serialized by the exclusive lock on the
//! hold row in `create_order`. Webhook deliveries are linearized per
//! idempotency key by the UNIQUE constraint on `payments.idempotency_key`
//! plus a re-probe inside the transaction.

use std::time::Instant;

use chrono::Utc;
use sqlx::PgPool;
use surge_cache::{forget_best_effort, stock_key, SharedCache};
use surge_db::{
    is_unique_violation, retry_on_contention, CoordError, OrderRow, OrderStatus, PaymentRow,
    PaymentStatus,
};
use surge_inventory::release_hold_on;
use surge_metrics::Metrics;
use tracing::info;

// ---------------------------------------------------------------------------
// Order creation
// ---------------------------------------------------------------------------

/// Convert a hold into a pending order, consuming the hold's single use.
pub async fn create_order(
    pool: &PgPool,
    cache: &SharedCache,
    metrics: &Metrics,
    hold_id: i64,
) -> Result<OrderRow, CoordError> {
    let (order, product_id) =
        retry_on_contention("create_order", metrics, || create_order_tx(pool, hold_id)).await?;

    forget_best_effort(cache, &stock_key(product_id)).await;

    info!(order_id = order.id, hold_id, "order created from hold");
    Ok(order)
}

/// One attempt: lock the hold row, check expiry and single-use, insert the
/// order, flip the hold. The UNIQUE index on `orders.hold_id` backstops a
/// racing insert; both failure modes read as "already used".
async fn create_order_tx(pool: &PgPool, hold_id: i64) -> Result<(OrderRow, i64), CoordError> {
    let mut tx = pool.begin().await?;

    let hold = surge_db::lock_hold(&mut tx, hold_id)
        .await?
        .ok_or(CoordError::NotFound("hold"))?;

    if hold.is_expired_at(Utc::now()) {
        return Err(CoordError::bad_request("Hold has expired"));
    }
    if hold.is_used {
        return Err(CoordError::bad_request("Hold has already been used"));
    }

    let order = match surge_db::insert_order(&mut tx, hold_id).await {
        Ok(order) => order,
        Err(err) if err.as_db_error().is_some_and(is_unique_violation) => {
            return Err(CoordError::bad_request("Hold has already been used"));
        }
        Err(err) => return Err(err),
    };

    surge_db::set_hold_used(&mut *tx, hold_id, true).await?;

    tx.commit().await?;
    Ok((order, hold.product_id))
}

// ---------------------------------------------------------------------------
// Webhook processing
// ---------------------------------------------------------------------------

/// Result of one webhook delivery: the order and the status it ended up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookOutcome {
    pub order_id: i64,
    pub status: OrderStatus,
}

/// Reconcile an order with a payment-provider delivery.
///
/// Replays are keyed purely on `idempotency_key`: any delivery whose key is
/// already recorded returns the *original* payment's order status, even when
/// the replay names a different order. A success marks the order paid; a
/// failure cancels it and releases its hold back to the active pool.
pub async fn process_webhook(
    pool: &PgPool,
    cache: &SharedCache,
    metrics: &Metrics,
    order_id: i64,
    idempotency_key: &str,
    status_str: &str,
) -> Result<WebhookOutcome, CoordError> {
    let started = Instant::now();

    // Pre-transaction probe: the cheap path for retried deliveries.
    if let Some(existing) = surge_db::payment_by_key(pool, idempotency_key).await? {
        let outcome = replay_outcome(pool, metrics, &existing).await?;
        metrics.webhook_processing.record(started.elapsed());
        return Ok(outcome);
    }

    let status = PaymentStatus::parse(status_str)
        .ok_or_else(|| CoordError::bad_request("Invalid status"))?;

    let (outcome, touched_product) = retry_on_contention("process_webhook", metrics, || {
        webhook_tx(pool, metrics, order_id, idempotency_key, status)
    })
    .await?;

    if let Some(product_id) = touched_product {
        forget_best_effort(cache, &stock_key(product_id)).await;
    }
    metrics.webhook_processing.record(started.elapsed());

    info!(
        order_id = outcome.order_id,
        status = outcome.status.as_str(),
        "webhook processed"
    );
    Ok(outcome)
}

/// Resolve a duplicate delivery from its recorded payment row.
async fn replay_outcome(
    pool: &PgPool,
    metrics: &Metrics,
    payment: &PaymentRow,
) -> Result<WebhookOutcome, CoordError> {
    metrics.incr_webhook_duplicate();
    let order = surge_db::order_by_id(pool, payment.order_id)
        .await?
        .ok_or_else(|| {
            CoordError::Internal(format!(
                "payment {} references missing order {}",
                payment.id, payment.order_id
            ))
        })?;
    Ok(WebhookOutcome {
        order_id: order.id,
        status: order.status,
    })
}

/// One attempt of the webhook transaction. Returns the outcome plus the
/// product whose snapshot must be invalidated (None for replays and for
/// orders that were already settled).
async fn webhook_tx(
    pool: &PgPool,
    metrics: &Metrics,
    order_id: i64,
    idempotency_key: &str,
    status: PaymentStatus,
) -> Result<(WebhookOutcome, Option<i64>), CoordError> {
    let mut tx = pool.begin().await?;

    let order = surge_db::order_by_id(&mut *tx, order_id)
        .await?
        .ok_or(CoordError::NotFound("order"))?;

    // Re-probe inside the transaction: a concurrent delivery may have
    // recorded the key since the fast path ran.
    if let Some(existing) = surge_db::payment_by_key(&mut *tx, idempotency_key).await? {
        drop(tx);
        let outcome = replay_outcome(pool, metrics, &existing).await?;
        return Ok((outcome, None));
    }

    match surge_db::insert_payment(&mut tx, order.id, idempotency_key, status).await {
        Ok(_) => {}
        Err(err) if err.as_db_error().is_some_and(is_unique_violation) => {
            // Lost the insert race. The aborted transaction cannot be
            // continued; resolve the duplicate on the pool.
            drop(tx);
            let existing = surge_db::payment_by_key(pool, idempotency_key)
                .await?
                .ok_or_else(|| {
                    CoordError::Internal(format!(
                        "payment for key {idempotency_key} vanished after unique violation"
                    ))
                })?;
            let outcome = replay_outcome(pool, metrics, &existing).await?;
            return Ok((outcome, None));
        }
        Err(err) => return Err(err),
    }

    let target = match status {
        PaymentStatus::Success => OrderStatus::Paid,
        PaymentStatus::Failed => OrderStatus::Cancelled,
    };
    let settled = surge_db::settle_order_if_pending(&mut *tx, order.id, target).await?;

    let (final_status, touched_product) = if settled {
        if status == PaymentStatus::Failed {
            // Quantity returns to the pool for the rest of the hold's window.
            release_hold_on(&mut tx, order.hold_id).await?;
        }
        let hold = surge_db::hold_by_id(&mut *tx, order.hold_id)
            .await?
            .ok_or_else(|| {
                CoordError::Internal(format!(
                    "order {} references missing hold {}",
                    order.id, order.hold_id
                ))
            })?;
        (target, Some(hold.product_id))
    } else {
        // Already settled by an earlier key; record the payment, leave the
        // order (and its hold) alone.
        let current = surge_db::order_by_id(&mut *tx, order.id)
            .await?
            .ok_or(CoordError::NotFound("order"))?;
        (current.status, None)
    };

    tx.commit().await?;
    Ok((
        WebhookOutcome {
            order_id: order.id,
            status: final_status,
        },
        touched_product,
    ))
}
