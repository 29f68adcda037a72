//! Persistence adapter for the surge coordination service.
//!
//! Free functions over sqlx executors, one small group per table. Anything
//! that must run under a row lock takes the transaction's connection; plain
//! reads take the pool. Transactions commit on normal return and roll back
//! when dropped, so callers never leave partial state behind.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};

pub mod error;
pub mod retry;

pub use error::{is_contention_error, is_unique_violation, CoordError, FieldErrors};
pub use retry::{retry_on_contention, BASE_DELAY_MS, MAX_ATTEMPTS};

pub const ENV_DB_URL: &str = "SURGE_DATABASE_URL";

/// Connect to Postgres using SURGE_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Test helper used by integration tests:
/// - Connect using SURGE_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Order lifecycle. Status progresses monotonically out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Payment provider verdict carried by a webhook. Rows are never updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProductRow {
    pub id: i64,
    pub name: String,
    /// Monetary value in micros (1_000_000 micros = 1 unit).
    pub price_micros: i64,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HoldRow {
    pub id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
}

impl HoldRow {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone)]
pub struct OrderRow {
    pub id: i64,
    pub hold_id: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub id: i64,
    pub order_id: i64,
    pub idempotency_key: String,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

fn map_product(row: &PgRow) -> Result<ProductRow, CoordError> {
    Ok(ProductRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        price_micros: row.try_get("price_micros")?,
        stock: row.try_get("stock")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_hold(row: &PgRow) -> Result<HoldRow, CoordError> {
    Ok(HoldRow {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        quantity: row.try_get("quantity")?,
        expires_at: row.try_get("expires_at")?,
        is_used: row.try_get("is_used")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_order(row: &PgRow) -> Result<OrderRow, CoordError> {
    let status: String = row.try_get("status")?;
    Ok(OrderRow {
        id: row.try_get("id")?,
        hold_id: row.try_get("hold_id")?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| CoordError::Internal(format!("unknown order status: {status}")))?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_payment(row: &PgRow) -> Result<PaymentRow, CoordError> {
    let status: String = row.try_get("status")?;
    Ok(PaymentRow {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        status: PaymentStatus::parse(&status)
            .ok_or_else(|| CoordError::Internal(format!("unknown payment status: {status}")))?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

/// Insert a product. The catalog is administered out-of-band; this exists
/// for seeding and tests.
pub async fn insert_product<'e, E>(
    db: E,
    name: &str,
    price_micros: i64,
    stock: i32,
) -> Result<ProductRow, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        insert into products (name, price_micros, stock)
        values ($1, $2, $3)
        returning id, name, price_micros, stock, created_at, updated_at
        "#,
    )
    .bind(name)
    .bind(price_micros)
    .bind(stock)
    .fetch_one(db)
    .await?;

    map_product(&row)
}

pub async fn product_by_id<'e, E>(db: E, product_id: i64) -> Result<Option<ProductRow>, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select id, name, price_micros, stock, created_at, updated_at
        from products
        where id = $1
        "#,
    )
    .bind(product_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(map_product).transpose()
}

/// Load a product under an exclusive row lock, held for the rest of the
/// transaction. Linearizes every availability check for that product.
pub async fn lock_product(
    conn: &mut sqlx::PgConnection,
    product_id: i64,
) -> Result<Option<ProductRow>, CoordError> {
    let row = sqlx::query(
        r#"
        select id, name, price_micros, stock, created_at, updated_at
        from products
        where id = $1
        for update
        "#,
    )
    .bind(product_id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(map_product).transpose()
}

/// Sum of quantities across a product's active holds (unused, and expiring
/// strictly after the database clock).
pub async fn active_hold_quantity<'e, E>(db: E, product_id: i64) -> Result<i64, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select coalesce(sum(quantity), 0)::bigint as reserved
        from holds
        where product_id = $1
          and is_used = false
          and expires_at > now()
        "#,
    )
    .bind(product_id)
    .fetch_one(db)
    .await?;

    Ok(row.try_get("reserved")?)
}

// ---------------------------------------------------------------------------
// Holds
// ---------------------------------------------------------------------------

pub async fn insert_hold(
    conn: &mut sqlx::PgConnection,
    product_id: i64,
    quantity: i32,
    expires_at: DateTime<Utc>,
) -> Result<HoldRow, CoordError> {
    let row = sqlx::query(
        r#"
        insert into holds (product_id, quantity, expires_at)
        values ($1, $2, $3)
        returning id, product_id, quantity, expires_at, is_used, created_at
        "#,
    )
    .bind(product_id)
    .bind(quantity)
    .bind(expires_at)
    .fetch_one(conn)
    .await?;

    map_hold(&row)
}

pub async fn hold_by_id<'e, E>(db: E, hold_id: i64) -> Result<Option<HoldRow>, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select id, product_id, quantity, expires_at, is_used, created_at
        from holds
        where id = $1
        "#,
    )
    .bind(hold_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(map_hold).transpose()
}

/// Load a hold under an exclusive row lock. Serializes double-submits on
/// one hold through `create_order`.
pub async fn lock_hold(
    conn: &mut sqlx::PgConnection,
    hold_id: i64,
) -> Result<Option<HoldRow>, CoordError> {
    let row = sqlx::query(
        r#"
        select id, product_id, quantity, expires_at, is_used, created_at
        from holds
        where id = $1
        for update
        "#,
    )
    .bind(hold_id)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(map_hold).transpose()
}

/// Flip a hold's used flag. Returns the number of rows touched (0 when the
/// hold does not exist).
pub async fn set_hold_used<'e, E>(db: E, hold_id: i64, used: bool) -> Result<u64, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        update holds
        set is_used = $2
        where id = $1
        "#,
    )
    .bind(hold_id)
    .bind(used)
    .execute(db)
    .await?;

    Ok(result.rows_affected())
}

/// Mark every past-due, still-unused hold as used, freeing its quantity.
/// The `is_used = false` guard makes re-runs no-ops; returns the ids the
/// statement actually transitioned.
pub async fn expire_due_holds<'e, E>(db: E) -> Result<Vec<(i64, i64)>, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        update holds
        set is_used = true
        where is_used = false
          and expires_at <= now()
        returning id, product_id
        "#,
    )
    .fetch_all(db)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push((row.try_get("id")?, row.try_get("product_id")?));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Insert a pending order for a hold. The UNIQUE index on `orders.hold_id`
/// is the at-most-one-order-per-hold backstop; a violation surfaces as
/// `CoordError::Db` with SQLSTATE 23505 for the caller to map.
pub async fn insert_order(
    conn: &mut sqlx::PgConnection,
    hold_id: i64,
) -> Result<OrderRow, CoordError> {
    let row = sqlx::query(
        r#"
        insert into orders (hold_id, status)
        values ($1, $2)
        returning id, hold_id, status, created_at
        "#,
    )
    .bind(hold_id)
    .bind(OrderStatus::Pending.as_str())
    .fetch_one(conn)
    .await?;

    map_order(&row)
}

pub async fn order_by_id<'e, E>(db: E, order_id: i64) -> Result<Option<OrderRow>, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select id, hold_id, status, created_at
        from orders
        where id = $1
        "#,
    )
    .bind(order_id)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(map_order).transpose()
}

/// Settle a pending order. The `status = 'pending'` guard keeps settled
/// orders settled; returns false when the order was already out of pending.
pub async fn settle_order_if_pending<'e, E>(
    db: E,
    order_id: i64,
    status: OrderStatus,
) -> Result<bool, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        update orders
        set status = $2
        where id = $1
          and status = $3
        "#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(OrderStatus::Pending.as_str())
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

/// Insert a payment row. The UNIQUE constraint on `idempotency_key` is the
/// hard idempotency safeguard; a violation surfaces as `CoordError::Db`
/// with SQLSTATE 23505 and must be treated as a duplicate delivery.
pub async fn insert_payment(
    conn: &mut sqlx::PgConnection,
    order_id: i64,
    idempotency_key: &str,
    status: PaymentStatus,
) -> Result<PaymentRow, CoordError> {
    let row = sqlx::query(
        r#"
        insert into payments (order_id, idempotency_key, status)
        values ($1, $2, $3)
        returning id, order_id, idempotency_key, status, created_at
        "#,
    )
    .bind(order_id)
    .bind(idempotency_key)
    .bind(status.as_str())
    .fetch_one(conn)
    .await?;

    map_payment(&row)
}

pub async fn payment_by_key<'e, E>(
    db: E,
    idempotency_key: &str,
) -> Result<Option<PaymentRow>, CoordError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        select id, order_id, idempotency_key, status, created_at
        from payments
        where idempotency_key = $1
        "#,
    )
    .bind(idempotency_key)
    .fetch_optional(db)
    .await?;

    row.as_ref().map(map_payment).transpose()
}

// ---------------------------------------------------------------------------
// Advisory locks
// ---------------------------------------------------------------------------

/// Derive a stable i64 advisory-lock key from a job name.
pub fn advisory_lock_key(name: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() as i64
}

/// Session-scoped `pg_try_advisory_lock`. Returns false when another
/// session holds the key; the caller should skip its tick, not wait.
pub async fn try_advisory_lock(
    conn: &mut sqlx::PgConnection,
    key: i64,
) -> Result<bool, CoordError> {
    let row = sqlx::query("select pg_try_advisory_lock($1) as locked")
        .bind(key)
        .fetch_one(conn)
        .await?;
    Ok(row.try_get("locked")?)
}

pub async fn advisory_unlock(conn: &mut sqlx::PgConnection, key: i64) -> Result<(), CoordError> {
    sqlx::query("select pg_advisory_unlock($1)")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_roundtrip() {
        for status in [OrderStatus::Pending, OrderStatus::Paid, OrderStatus::Cancelled] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("refunded"), None);
    }

    #[test]
    fn payment_status_roundtrip() {
        for status in [PaymentStatus::Success, PaymentStatus::Failed] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("pending"), None);
    }

    #[test]
    fn advisory_lock_key_is_stable() {
        let a = advisory_lock_key("holds:process-expired");
        let b = advisory_lock_key("holds:process-expired");
        assert_eq!(a, b);
        assert_ne!(a, advisory_lock_key("some-other-job"));
    }

    #[test]
    fn hold_expiry_is_inclusive_at_boundary() {
        let now = Utc::now();
        let hold = HoldRow {
            id: 1,
            product_id: 1,
            quantity: 1,
            expires_at: now,
            is_used: false,
            created_at: now,
        };
        // expires_at <= now counts as expired; strictly-future stays live.
        assert!(hold.is_expired_at(now));
        assert!(!hold.is_expired_at(now - chrono::Duration::seconds(1)));
    }
}
