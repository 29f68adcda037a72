//! Axum router and all HTTP handlers for surge-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers are thin: validate, call the coordination
//! core, format. All domain decisions live in surge-inventory /
//! surge-payments; all error mapping lives in `ApiError` here.

use std::sync::Arc;

use axum::{
    extract::rejection::JsonRejection,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use surge_cache::{get_best_effort, put_best_effort, stock_key, STOCK_SNAPSHOT_TTL};
use surge_db::CoordError;
use tracing::error;

use crate::{
    api_types::{
        format_price_micros, ErrorBody, HealthResponse, HoldResponse, OrderResponse,
        ProductResponse, ValidationBody, WebhookResponse,
    },
    state::{uptime_secs, AppState},
    validate,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/products/:id", get(get_product))
        .route("/api/holds", post(create_hold))
        .route("/api/orders", post(create_order))
        .route("/api/payments/webhook", post(payments_webhook))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Edge-side rendering of the domain error taxonomy.
pub struct ApiError(CoordError);

impl From<CoordError> for ApiError {
    fn from(err: CoordError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            err @ CoordError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response(),
            CoordError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorBody { error: message })).into_response()
            }
            CoordError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ValidationBody {
                    message: "Validation failed".to_string(),
                    errors,
                }),
            )
                .into_response(),
            err @ CoordError::ContentionExhausted { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: err.to_string(),
                }),
            )
                .into_response(),
            err => {
                error!(error = ?err, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorBody {
                        error: "Internal server error".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

/// Unify Axum's JSON rejection with field-level validation.
fn parse_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(validate::body_rejection(rejection.body_text()).into()),
    }
}

// ---------------------------------------------------------------------------
// GET /api/products/{id}
// ---------------------------------------------------------------------------

/// Product detail with a read-through cached availability snapshot. The
/// cache path may be up to the TTL stale; the DB path is authoritative.
pub(crate) async fn get_product(
    State(st): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let product = surge_db::product_by_id(&st.pool, id)
        .await?
        .ok_or(CoordError::NotFound("product"))?;

    let key = stock_key(id);
    let cached = get_best_effort(&st.cache, &key)
        .await
        .and_then(|raw| raw.parse::<i64>().ok());

    let available = match cached {
        Some(value) => {
            st.metrics.incr_cache_hit();
            value
        }
        None => {
            st.metrics.incr_cache_miss();
            let value = surge_inventory::available_stock(&st.pool, id)
                .await?
                .ok_or(CoordError::NotFound("product"))?;
            put_best_effort(&st.cache, &key, &value.to_string(), STOCK_SNAPSHOT_TTL).await;
            value
        }
    };

    let body = ProductResponse {
        id: product.id,
        name: product.name,
        price: format_price_micros(product.price_micros),
        total_stock: product.stock,
        available_stock: available,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/holds
// ---------------------------------------------------------------------------

pub(crate) async fn create_hold(
    State(st): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let params = validate::create_hold(&parse_body(body)?)?;

    let hold = surge_inventory::create_hold(
        &st.pool,
        &st.cache,
        &st.metrics,
        params.product_id,
        params.qty,
    )
    .await?;

    let body = HoldResponse {
        hold_id: hold.id,
        product_id: hold.product_id,
        quantity: hold.quantity,
        expires_at: surge_inventory::expires_at_iso(&hold),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/orders
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let params = validate::create_order(&parse_body(body)?)?;

    let order =
        surge_payments::create_order(&st.pool, &st.cache, &st.metrics, params.hold_id).await?;

    let body = OrderResponse {
        order_id: order.id,
        hold_id: order.hold_id,
        status: order.status.as_str().to_string(),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/payments/webhook
// ---------------------------------------------------------------------------

pub(crate) async fn payments_webhook(
    State(st): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ApiError> {
    let params = validate::webhook(&parse_body(body)?)?;

    let outcome = surge_payments::process_webhook(
        &st.pool,
        &st.cache,
        &st.metrics,
        params.order_id,
        &params.idempotency_key,
        &params.status,
    )
    .await?;

    let body = WebhookResponse {
        order_id: outcome.order_id,
        status: outcome.status.as_str().to_string(),
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

// ---------------------------------------------------------------------------
// GET /healthz
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.metrics.snapshot()))
}
