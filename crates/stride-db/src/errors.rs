//! Classification of storage failures.
//!
//! Query functions return `anyhow::Error` with context attached. The helpers
//! here look through that context for the underlying `sqlx::Error` so the
//! service layer can tell constraint violations and lock contention apart
//! from genuine storage faults.

use sqlx::error::DatabaseError;

/// SQLSTATE codes that indicate a concurrent writer won a race.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";

fn database_error(err: &anyhow::Error) -> Option<&dyn DatabaseError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .and_then(|e| e.as_database_error())
}

/// Whether the error was caused by a unique constraint or unique index.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    database_error(err).is_some_and(|db| db.is_unique_violation())
}

/// Name of the violated constraint, when the database reported one.
pub fn constraint_name(err: &anyhow::Error) -> Option<String> {
    database_error(err).and_then(|db| db.constraint().map(str::to_owned))
}

/// Whether the error is a serialization failure, deadlock, or lock timeout;
/// the caller may retry the whole unit of work.
pub fn is_contention(err: &anyhow::Error) -> bool {
    database_error(err)
        .and_then(|db| db.code())
        .is_some_and(|code| {
            matches!(
                code.as_ref(),
                SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE
            )
        })
}

/// Whether the error is a CHECK constraint violation.
pub fn is_check_violation(err: &anyhow::Error) -> bool {
    database_error(err).is_some_and(|db| db.is_check_violation())
}
