//! Aggregate store abstraction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::error::DomainError;
use crate::outbox::OutboxRecord;

/// A state change to commit for one aggregate.
///
/// `expected_version` is the version the caller loaded; the store rejects the
/// change with `ConcurrencyConflict` if someone else committed in between.
#[derive(Debug)]
pub enum Mutation<'a, A> {
    /// Insert a new aggregate. Fails if the id already exists.
    Create(&'a A),
    /// Replace the stored state with the post-mutation aggregate.
    Update {
        /// The post-mutation aggregate.
        aggregate: &'a A,
        /// The version the mutation was computed from.
        expected_version: i64,
    },
    /// Remove the aggregate.
    Delete {
        /// The aggregate being removed (its uncommitted events are published).
        aggregate: &'a A,
        /// The version the deletion was computed from.
        expected_version: i64,
    },
}

impl<A: AggregateRoot> Mutation<'_, A> {
    /// Returns the aggregate this mutation applies to.
    pub fn aggregate(&self) -> &A {
        match self {
            Self::Create(aggregate)
            | Self::Update { aggregate, .. }
            | Self::Delete { aggregate, .. } => aggregate,
        }
    }

    /// Short name of the mutation for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Durable per-service storage for an owned aggregate.
///
/// `commit` writes the aggregate change and the given outbox records in one
/// atomic transaction: either both are stored or neither is. The store never
/// talks to the message bus.
#[async_trait]
pub trait AggregateStore<A: AggregateRoot + 'static>: Send + Sync {
    /// Loads an aggregate by id. Returns `None` if it does not exist.
    async fn load(&self, id: Uuid) -> Result<Option<A>, DomainError>;

    /// Loads every aggregate of this type.
    async fn load_all(&self) -> Result<Vec<A>, DomainError>;

    /// Atomically applies `mutation` and appends `outbox` records.
    ///
    /// # Errors
    ///
    /// - `AggregateNotFound` if an update/delete targets a missing id.
    /// - `ConcurrencyConflict` if the stored version differs from the expected one.
    /// - `Persistence` if the transaction could not be committed.
    async fn commit(
        &self,
        mutation: Mutation<'_, A>,
        outbox: &[OutboxRecord],
    ) -> Result<(), DomainError>;
}
