//! Request and response types for all surge-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded by
//! Axum and decoded by tests. No business logic lives here.

use serde::{Deserialize, Serialize};
use surge_db::FieldErrors;

// ---------------------------------------------------------------------------
// GET /api/products/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: i64,
    pub name: String,
    /// Decimal string with two places, e.g. "19.99".
    pub price: String,
    pub total_stock: i32,
    pub available_stock: i64,
}

/// Render integer micros as a two-decimal price string.
pub fn format_price_micros(micros: i64) -> String {
    let whole = micros / 1_000_000;
    let cents = (micros % 1_000_000) / 10_000;
    format!("{whole}.{cents:02}")
}

// ---------------------------------------------------------------------------
// POST /api/holds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldResponse {
    pub hold_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    /// ISO-8601, UTC.
    pub expires_at: String,
}

// ---------------------------------------------------------------------------
// POST /api/orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: i64,
    pub hold_id: i64,
    /// "pending" on creation.
    pub status: String,
}

// ---------------------------------------------------------------------------
// POST /api/payments/webhook
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub order_id: i64,
    /// "paid" | "cancelled" (or "pending" when the order was left untouched).
    pub status: String,
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

// ---------------------------------------------------------------------------
// Error bodies
// ---------------------------------------------------------------------------

/// Body for 400 / 404 / 500 responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Body for 422 responses: `{message, errors: {field: [msg, …]}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationBody {
    pub message: String,
    pub errors: FieldErrors,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_micros_render_two_decimals() {
        assert_eq!(format_price_micros(19_990_000), "19.99");
        assert_eq!(format_price_micros(5_000_000), "5.00");
        assert_eq!(format_price_micros(0), "0.00");
        assert_eq!(format_price_micros(1_090_000), "1.09");
    }
}
