//! Transient versus permanent database failures.

use pulsemon_common::retry::Retryability;
use sea_orm::{DbErr, RuntimeErr};

/// SQLSTATE raised when a value exceeds its column type.
pub const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// Classifies a PostgreSQL SQLSTATE code.
///
/// Connection exceptions (class 08), transaction rollbacks, serialization
/// failures, deadlocks and "cannot connect now" are retried.
pub fn classify_code(code: &str) -> Retryability {
    match code {
        c if c.starts_with("08") => Retryability::Retryable,
        "40000" | "40001" | "40P01" | "57P03" => Retryability::Retryable,
        _ => Retryability::NonRetryable,
    }
}

/// Classifies a sea-orm error. Only PostgreSQL wire errors with a retryable
/// code and pool acquire failures are retried.
pub fn classify(err: &DbErr) -> Retryability {
    match err {
        DbErr::ConnectionAcquire(_) => Retryability::Retryable,
        DbErr::Conn(runtime) | DbErr::Exec(runtime) | DbErr::Query(runtime) => {
            classify_runtime(runtime)
        }
        _ => Retryability::NonRetryable,
    }
}

fn classify_runtime(err: &RuntimeErr) -> Retryability {
    runtime_sqlstate(err)
        .map(|code| classify_code(&code))
        .unwrap_or(Retryability::NonRetryable)
}

/// The SQLSTATE code PostgreSQL attached to `err`, if it came off the wire.
pub fn sqlstate(err: &DbErr) -> Option<String> {
    match err {
        DbErr::Conn(runtime) | DbErr::Exec(runtime) | DbErr::Query(runtime) => {
            runtime_sqlstate(runtime)
        }
        _ => None,
    }
}

fn runtime_sqlstate(err: &RuntimeErr) -> Option<String> {
    match err {
        RuntimeErr::SqlxError(e) => e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned()),
        _ => None,
    }
}
