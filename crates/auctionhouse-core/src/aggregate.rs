//! Aggregate root abstraction.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::event::DomainEvent;

/// Trait for aggregate roots persisted as state snapshots.
///
/// Domain methods record the events they cause as uncommitted events and bump
/// `version` once per event, so after a mutation `version()` is the version the
/// store must hold once the change commits.
pub trait AggregateRoot: Serialize + DeserializeOwned + Send + Sync {
    /// The event type this aggregate produces.
    type Event: DomainEvent;

    /// Stable name of the aggregate type (stored alongside state and events).
    const AGGREGATE_TYPE: &'static str;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (concurrency token).
    fn version(&self) -> i64;

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);
}
