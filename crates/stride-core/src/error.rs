//! Domain error type shared by every service in this crate.

use stride_db::errors as db_errors;

/// Errors surfaced to callers of the plan services.
///
/// Storage failures arrive as `anyhow::Error` from the query layer; lock
/// and serialization failures among them are reclassified as retryable
/// conflicts by the `From` impl.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {message}")]
    Conflict { message: String, retryable: bool },

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

pub type PlanResult<T> = Result<T, PlanError>;

impl PlanError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable_conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_transition(
        entity: impl std::fmt::Display,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity: entity.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether the caller may succeed by retrying the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { retryable: true, .. })
    }

    /// Short machine-readable kind, used in API bodies and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict { .. } => "conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<anyhow::Error> for PlanError {
    fn from(err: anyhow::Error) -> Self {
        if db_errors::is_contention(&err) {
            return Self::retryable_conflict(format!("{err:#}"));
        }
        if db_errors::is_check_violation(&err) {
            let constraint = db_errors::constraint_name(&err).unwrap_or_default();
            return Self::validation(format!("rejected by constraint {constraint}: {err:#}"));
        }
        Self::Storage(err)
    }
}

impl From<sqlx::Error> for PlanError {
    fn from(err: sqlx::Error) -> Self {
        anyhow::Error::new(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_conflicts_are_retryable() {
        assert!(PlanError::retryable_conflict("lost race").is_retryable());
        assert!(!PlanError::conflict("duplicate").is_retryable());
        assert!(!PlanError::validation("bad").is_retryable());
    }

    #[test]
    fn plain_storage_errors_stay_storage() {
        let err: PlanError = anyhow::anyhow!("disk on fire").into();
        assert!(matches!(err, PlanError::Storage(_)));
        assert_eq!(err.kind(), "storage");
    }

    #[test]
    fn pool_timeout_is_storage() {
        let err: PlanError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, PlanError::Storage(_)));
    }

    #[test]
    fn invalid_transition_message_names_states() {
        let err = PlanError::invalid_transition("session:abc", "completed", "planned");
        assert_eq!(
            err.to_string(),
            "invalid transition for session:abc: completed -> planned"
        );
    }
}
