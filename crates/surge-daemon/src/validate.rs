//! Request-body validation.
//!
//! Bodies are parsed as raw JSON and checked field by field, so every
//! violation lands in the per-field error map of the 422 body rather than
//! an opaque deserializer message. Value-level domain rules (e.g. an
//! unknown webhook status) are NOT validation errors; they surface as 400s
//! from the domain layer.

use serde_json::Value;
use surge_db::{CoordError, FieldErrors};

/// Validated POST /api/holds body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateHoldParams {
    pub product_id: i64,
    pub qty: i32,
}

/// Validated POST /api/orders body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOrderParams {
    pub hold_id: i64,
}

/// Validated POST /api/payments/webhook body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookParams {
    pub order_id: i64,
    pub idempotency_key: String,
    pub status: String,
}

pub fn create_hold(body: &Value) -> Result<CreateHoldParams, CoordError> {
    let mut errors = FieldErrors::new();
    let body = require_object(body, &mut errors)?;

    let product_id = require_integer(body, "product_id", &mut errors);
    let qty = require_integer(body, "qty", &mut errors);
    if let Some(qty) = qty {
        if qty < 1 {
            push(&mut errors, "qty", "The qty field must be at least 1.");
        } else if qty > i64::from(i32::MAX) {
            push(&mut errors, "qty", "The qty field is out of range.");
        }
    }

    match (product_id, qty) {
        (Some(product_id), Some(qty)) if errors.is_empty() => Ok(CreateHoldParams {
            product_id,
            // Range-checked above.
            qty: qty as i32,
        }),
        _ => Err(CoordError::Validation(errors)),
    }
}

pub fn create_order(body: &Value) -> Result<CreateOrderParams, CoordError> {
    let mut errors = FieldErrors::new();
    let body = require_object(body, &mut errors)?;

    match require_integer(body, "hold_id", &mut errors) {
        Some(hold_id) if errors.is_empty() => Ok(CreateOrderParams { hold_id }),
        _ => Err(CoordError::Validation(errors)),
    }
}

pub fn webhook(body: &Value) -> Result<WebhookParams, CoordError> {
    let mut errors = FieldErrors::new();
    let body = require_object(body, &mut errors)?;

    let order_id = require_integer(body, "order_id", &mut errors);
    let idempotency_key = require_string(body, "idempotency_key", &mut errors);
    if let Some(key) = &idempotency_key {
        if key.is_empty() {
            push(
                &mut errors,
                "idempotency_key",
                "The idempotency_key field must not be empty.",
            );
        }
    }
    let status = require_string(body, "status", &mut errors);

    match (order_id, idempotency_key, status) {
        (Some(order_id), Some(idempotency_key), Some(status)) if errors.is_empty() => {
            Ok(WebhookParams {
                order_id,
                idempotency_key,
                status,
            })
        }
        _ => Err(CoordError::Validation(errors)),
    }
}

/// Wrap an Axum body rejection (malformed JSON, wrong content type) in the
/// same 422 shape as field-level failures.
pub fn body_rejection(detail: String) -> CoordError {
    let mut errors = FieldErrors::new();
    errors.insert("body".to_string(), vec![detail]);
    CoordError::Validation(errors)
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn require_object<'v>(
    body: &'v Value,
    errors: &mut FieldErrors,
) -> Result<&'v serde_json::Map<String, Value>, CoordError> {
    match body.as_object() {
        Some(map) => Ok(map),
        None => {
            push(errors, "body", "The request body must be a JSON object.");
            Err(CoordError::Validation(std::mem::take(errors)))
        }
    }
}

fn require_integer(
    body: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<i64> {
    match body.get(field) {
        None | Some(Value::Null) => {
            push(errors, field, &format!("The {field} field is required."));
            None
        }
        Some(value) => match value.as_i64() {
            Some(n) => Some(n),
            None => {
                push(errors, field, &format!("The {field} field must be an integer."));
                None
            }
        },
    }
}

fn require_string(
    body: &serde_json::Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<String> {
    match body.get(field) {
        None | Some(Value::Null) => {
            push(errors, field, &format!("The {field} field is required."));
            None
        }
        Some(value) => match value.as_str() {
            Some(s) => Some(s.to_string()),
            None => {
                push(errors, field, &format!("The {field} field must be a string."));
                None
            }
        },
    }
}

fn push(errors: &mut FieldErrors, field: &str, message: &str) {
    errors
        .entry(field.to_string())
        .or_default()
        .push(message.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_errors(err: CoordError) -> FieldErrors {
        match err {
            CoordError::Validation(errors) => errors,
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn create_hold_accepts_well_formed_body() {
        let params =
            create_hold(&json!({"product_id": 3, "qty": 2})).expect("valid body");
        assert_eq!(params, CreateHoldParams { product_id: 3, qty: 2 });
    }

    #[test]
    fn create_hold_reports_missing_fields_per_field() {
        let errors = field_errors(create_hold(&json!({})).expect_err("empty body"));
        assert_eq!(
            errors.get("product_id").map(Vec::as_slice),
            Some(&["The product_id field is required.".to_string()][..])
        );
        assert!(errors.contains_key("qty"));
    }

    #[test]
    fn create_hold_rejects_wrong_types_and_ranges() {
        let errors = field_errors(
            create_hold(&json!({"product_id": "three", "qty": 0})).expect_err("bad body"),
        );
        assert_eq!(
            errors.get("product_id").map(Vec::as_slice),
            Some(&["The product_id field must be an integer.".to_string()][..])
        );
        assert_eq!(
            errors.get("qty").map(Vec::as_slice),
            Some(&["The qty field must be at least 1.".to_string()][..])
        );
    }

    #[test]
    fn non_object_bodies_fail_as_a_whole() {
        let errors = field_errors(create_hold(&json!([1, 2])).expect_err("array body"));
        assert!(errors.contains_key("body"));
    }

    #[test]
    fn webhook_requires_non_empty_key() {
        let errors = field_errors(
            webhook(&json!({"order_id": 1, "idempotency_key": "", "status": "success"}))
                .expect_err("empty key"),
        );
        assert_eq!(
            errors.get("idempotency_key").map(Vec::as_slice),
            Some(&["The idempotency_key field must not be empty.".to_string()][..])
        );
    }

    #[test]
    fn webhook_passes_unknown_status_through_to_domain() {
        // "refunded" is schema-valid; rejecting its value is the domain's
        // job (400), not validation's (422).
        let params = webhook(&json!({
            "order_id": 9,
            "idempotency_key": "k-1",
            "status": "refunded"
        }))
        .expect("schema-valid body");
        assert_eq!(params.status, "refunded");
    }

    #[test]
    fn create_order_requires_hold_id() {
        let errors = field_errors(create_order(&json!({"hold": 1})).expect_err("wrong field"));
        assert!(errors.contains_key("hold_id"));
    }
}
