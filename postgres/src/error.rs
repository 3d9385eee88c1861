//! Mapping from sqlx errors to the engine's taxonomy.

use servicehub_core::error::EngineError;

/// `lock_not_available`: `SET LOCAL lock_timeout` expired.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `query_canceled`: `SET LOCAL statement_timeout` expired.
const QUERY_CANCELED: &str = "57014";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Unique indexes backing the ledger idempotency keys.
const IDEMPOTENCY_INDEXES: [&str; 2] = [
    "uq_wallet_entries_hold_credit_booking",
    "uq_inventory_entries_consumption",
];

/// Classify a sqlx error. Lock and statement timeouts become
/// [`EngineError::LockTimeout`]; serialization failures, deadlocks, pool
/// exhaustion and lost races on an idempotency key become
/// [`EngineError::Transient`]. Both are retryable.
pub(crate) fn map_sqlx(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::Database(db) => {
            classify_database(db.code().as_deref(), db.constraint(), db.message())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => EngineError::Transient(err.to_string()),
        _ => EngineError::Storage(err.to_string()),
    }
}

fn classify_database(code: Option<&str>, constraint: Option<&str>, message: &str) -> EngineError {
    match code {
        Some(LOCK_NOT_AVAILABLE | QUERY_CANCELED) => {
            metrics::counter!("postgres_lock_timeouts_total").increment(1);
            EngineError::LockTimeout(message.to_string())
        }
        Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
            EngineError::Transient(message.to_string())
        }
        // Another writer recorded the same key first; a retry observes it.
        Some(UNIQUE_VIOLATION)
            if constraint.is_some_and(|name| IDEMPOTENCY_INDEXES.contains(&name)) =>
        {
            EngineError::Transient(format!("idempotency key taken concurrently: {message}"))
        }
        Some(UNIQUE_VIOLATION) => EngineError::Storage(format!(
            "duplicate key ({}): {message}",
            constraint.unwrap_or("unknown constraint")
        )),
        _ => EngineError::Storage(message.to_string()),
    }
}

/// A column value that does not fit the domain type.
pub(crate) fn corrupt(column: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(format!("column {column} holds an invalid value: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_retryable() {
        assert!(map_sqlx(sqlx::Error::PoolTimedOut).is_retryable());
    }

    #[test]
    fn lost_idempotency_race_is_retryable() {
        for index in IDEMPOTENCY_INDEXES {
            let err = classify_database(Some(UNIQUE_VIOLATION), Some(index), "duplicate key");
            assert!(matches!(err, EngineError::Transient(_)), "{index}: {err:?}");
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn other_unique_violations_are_storage() {
        let err = classify_database(Some(UNIQUE_VIOLATION), Some("bookings_pkey"), "duplicate key");
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn lock_not_available_is_lock_timeout() {
        let err = classify_database(Some(LOCK_NOT_AVAILABLE), None, "could not obtain lock");
        assert!(matches!(err, EngineError::LockTimeout(_)));
    }

    #[test]
    fn row_not_found_is_storage() {
        assert!(matches!(
            map_sqlx(sqlx::Error::RowNotFound),
            EngineError::Storage(_)
        ));
    }
}
