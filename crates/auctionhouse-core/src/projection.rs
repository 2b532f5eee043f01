//! Consumer-side projection storage.
//!
//! A projection store keeps, per aggregate id, the sequence number of the last
//! applied event. Applying an event with a sequence that is not newer is a
//! no-op, which makes redelivery and out-of-order delivery harmless. Deleted
//! aggregates leave a tombstone so a late update cannot resurrect them.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DomainError;

/// What an event does to a projection entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionChange<P> {
    /// Replace the entry with a new document.
    Upsert(P),
    /// Remove the entry, keeping a tombstone with the sequence number.
    Remove,
}

/// Result of applying an event to a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The change was written.
    Applied,
    /// This sequence was already applied.
    Duplicate,
    /// A newer sequence was already applied; the change was ignored.
    Stale,
}

impl ApplyOutcome {
    /// Classifies an incoming sequence against the last applied one.
    #[must_use]
    pub fn classify(last_applied: Option<i64>, incoming: i64) -> Self {
        match last_applied {
            None => Self::Applied,
            Some(last) if incoming > last => Self::Applied,
            Some(last) if incoming == last => Self::Duplicate,
            Some(_) => Self::Stale,
        }
    }
}

/// Local, read-optimised copy of remote state, owned by one consumer.
#[async_trait]
pub trait ProjectionStore<P>: Send + Sync
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Applies `change` if `sequence_number` is newer than the last applied
    /// sequence for `aggregate_id`. The check and the write are atomic.
    async fn apply(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
        change: ProjectionChange<P>,
    ) -> Result<ApplyOutcome, DomainError>;

    /// Returns the live document for `aggregate_id`, if any.
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<P>, DomainError>;

    /// Returns every live document.
    async fn list(&self) -> Result<Vec<P>, DomainError>;

    /// Returns the last applied sequence for `aggregate_id`, tombstones included.
    async fn last_sequence(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError>;
}
