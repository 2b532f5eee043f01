//! Transactional outbox: pending integration events stored next to the
//! aggregate change they describe, dispatched to the bus asynchronously.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::AggregateRoot;
use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::IntegrationEvent;
use crate::repository::{AggregateStore, Mutation};

/// Lifecycle state of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Committed, not yet accepted by the bus.
    Pending,
    /// Accepted by the bus; kept until the retention window passes.
    Dispatched,
    /// Gave up after the maximum number of attempts; kept for inspection.
    DeadLettered,
}

impl OutboxStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "dispatched" => Ok(Self::Dispatched),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(DomainError::Infrastructure(format!(
                "unknown outbox status: {other}"
            ))),
        }
    }
}

/// An integration event waiting in (or dispatched from) the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// The event to deliver.
    pub event: IntegrationEvent,
    /// Commit order assigned by the store; `0` until stored.
    pub position: i64,
    /// Current lifecycle state.
    pub status: OutboxStatus,
    /// Failed dispatch attempts so far.
    pub attempts: i32,
    /// Earliest time the record may be (re)claimed.
    pub next_attempt_at: DateTime<Utc>,
    /// Last dispatch error, if any.
    pub last_error: Option<String>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the bus accepted the event.
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// A fresh pending record, due immediately.
    #[must_use]
    pub fn pending(event: IntegrationEvent, now: DateTime<Utc>) -> Self {
        Self {
            event,
            position: 0,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            dispatched_at: None,
        }
    }

    /// The record id (equal to the event id).
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.event.event_id
    }
}

/// Storage operations used by the outbox dispatcher.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Claims up to `limit` due pending records, oldest commit first.
    ///
    /// A record is due when `next_attempt_at <= now` and no earlier pending
    /// record exists for the same aggregate. Claimed records are leased until
    /// `lease_until` so that other dispatchers skip them.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, DomainError>;

    /// Marks a record as accepted by the bus.
    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DomainError>;

    /// Records a failed attempt and when to try again.
    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError>;

    /// Moves a record to the dead-letter state after its final failed attempt.
    async fn dead_letter(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), DomainError>;

    /// Deletes dispatched records older than `before`; returns how many.
    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64, DomainError>;
}

/// Commits `mutation` together with one pending outbox record per uncommitted
/// event of the post-mutation aggregate, in a single store transaction.
///
/// Returns the integration events that were enqueued. If the commit fails no
/// record exists for the attempt.
///
/// # Errors
///
/// Propagates the store's `DomainError` unchanged.
pub async fn publish_with_mutation<A: AggregateRoot + 'static>(
    store: &dyn AggregateStore<A>,
    mutation: Mutation<'_, A>,
    clock: &dyn Clock,
) -> Result<Vec<IntegrationEvent>, DomainError> {
    let now = clock.now();
    let events: Vec<IntegrationEvent> = mutation
        .aggregate()
        .uncommitted_events()
        .iter()
        .map(|event| IntegrationEvent::from_domain(A::AGGREGATE_TYPE, event))
        .collect();

    let records: Vec<OutboxRecord> = events
        .iter()
        .cloned()
        .map(|event| OutboxRecord::pending(event, now))
        .collect();

    store.commit(mutation, &records).await?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_storage_name() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::Dispatched,
            OutboxStatus::DeadLettered,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_infrastructure_error() {
        match "archived".parse::<OutboxStatus>() {
            Err(DomainError::Infrastructure(msg)) => assert!(msg.contains("archived")),
            other => panic!("expected Infrastructure, got {other:?}"),
        }
    }
}
