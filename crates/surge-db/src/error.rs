//! Domain error taxonomy and retryable-error classification.
//!
//! `CoordError` is the sum type every coordination operation returns; the
//! HTTP edge maps kinds to status codes. Conversion from `sqlx::Error`
//! classifies contention (deadlock / serialization failure) so the retry
//! wrapper can distinguish it from everything else.

use std::collections::BTreeMap;

use thiserror::Error;

/// Per-field validation messages, keyed by request field name.
/// BTreeMap keeps the JSON error object deterministic.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum CoordError {
    /// Missing product, hold, or order. Maps to 404.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Domain rule violation (insufficient stock, expired hold, …). Maps to 400.
    #[error("{0}")]
    BadRequest(String),

    /// Request-body schema violation. Maps to 422.
    #[error("Validation failed")]
    Validation(FieldErrors),

    /// Deadlock or serialization failure; safe to retry.
    #[error("database contention")]
    Contention(#[source] sqlx::Error),

    /// Contention survived the retry budget. Maps to 500.
    #[error("Service temporarily unavailable due to database contention")]
    ContentionExhausted { op: &'static str },

    /// Any other database failure. Maps to 500.
    #[error("database error")]
    Db(#[source] sqlx::Error),

    /// Invariant breakage surfaced at the persistence boundary
    /// (e.g. an unknown status string in a row). Maps to 500.
    #[error("{0}")]
    Internal(String),
}

impl CoordError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }

    /// The underlying database error, when there is one.
    pub fn as_db_error(&self) -> Option<&sqlx::Error> {
        match self {
            Self::Contention(err) | Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CoordError {
    fn from(err: sqlx::Error) -> Self {
        if is_contention_error(&err) {
            Self::Contention(err)
        } else {
            Self::Db(err)
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// True when the error signals a deadlock or serialization failure:
/// SQLSTATE 40001 / 40P01, MySQL error 1213, or a message containing
/// "deadlock" / "try restarting transaction".
pub fn is_contention_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            is_contention_signal(db_err.code().as_deref(), &db_err.message().to_lowercase())
        }
        _ => false,
    }
}

fn is_contention_signal(code: Option<&str>, message: &str) -> bool {
    matches!(code, Some("40001") | Some("40P01") | Some("1213"))
        || message.contains("deadlock")
        || message.contains("try restarting transaction")
}

/// Detect a unique-constraint violation (SQLSTATE 23505).
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_codes_are_recognized() {
        assert!(is_contention_signal(Some("40001"), ""));
        assert!(is_contention_signal(Some("40P01"), ""));
        assert!(is_contention_signal(Some("1213"), ""));
        assert!(!is_contention_signal(Some("23505"), "duplicate key value"));
        assert!(!is_contention_signal(None, "syntax error at or near"));
    }

    #[test]
    fn contention_messages_are_recognized() {
        assert!(is_contention_signal(None, "deadlock detected"));
        assert!(is_contention_signal(
            None,
            "lock wait timeout; try restarting transaction"
        ));
        assert!(!is_contention_signal(None, "permission denied"));
    }

    #[test]
    fn non_database_errors_are_not_contention() {
        assert!(!is_contention_error(&sqlx::Error::PoolTimedOut));
        assert!(!is_unique_violation(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn sqlx_conversion_preserves_non_contention_as_db() {
        let err = CoordError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoordError::Db(_)));
        assert!(!err.is_contention());
    }
}
