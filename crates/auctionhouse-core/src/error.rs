//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// The acting identity does not own the aggregate.
    #[error("{actor} is not allowed to modify aggregate {aggregate_id}")]
    Forbidden {
        /// The aggregate the actor tried to modify.
        aggregate_id: Uuid,
        /// The identity that attempted the change.
        actor: String,
    },

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// The store refused or failed to commit a change. Nothing was written.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// An infrastructure error outside the commit path (e.g. serialization).
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}
