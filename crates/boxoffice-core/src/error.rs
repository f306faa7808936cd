//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate (or its read projection) was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict: another writer saved first.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found (`-1` when the row is missing).
        actual: i64,
    },

    /// Bad input, rejected before any mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The requested transition is not allowed from the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The payment window of a reservation has lapsed.
    #[error("reservation {0} has expired")]
    Expired(Uuid),

    /// The aggregate exists but belongs to someone else.
    #[error("access to aggregate {0} is forbidden")]
    Forbidden(Uuid),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_conflict_message_names_versions() {
        let id = Uuid::new_v4();
        let err = DomainError::ConcurrencyConflict {
            aggregate_id: id,
            expected: 1,
            actual: 2,
        };

        let message = err.to_string();

        assert!(message.contains(&id.to_string()));
        assert!(message.contains("expected version 1"));
        assert!(message.contains("found 2"));
    }

    #[test]
    fn test_expired_message_names_reservation() {
        let id = Uuid::new_v4();
        assert_eq!(
            DomainError::Expired(id).to_string(),
            format!("reservation {id} has expired")
        );
    }
}
