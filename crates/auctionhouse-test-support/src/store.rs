//! Test stores: in-memory `AggregateStore` + `OutboxRepository`
//! implementations for tests.

use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Mutex;

use async_trait::async_trait;
use auctionhouse_core::aggregate::AggregateRoot;
use auctionhouse_core::error::DomainError;
use auctionhouse_core::outbox::{OutboxRecord, OutboxRepository, OutboxStatus};
use auctionhouse_core::repository::{AggregateStore, Mutation};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    aggregates: HashMap<Uuid, (i64, serde_json::Value)>,
    outbox: Vec<OutboxRecord>,
    next_position: i64,
    fail_next_commit: bool,
    outbox_update_failures: u32,
}

/// An aggregate store and outbox sharing one lock, so a commit writes the
/// aggregate and its outbox records atomically, like a database transaction.
/// State is kept as JSON to exercise the same serde path as the real store.
#[derive(Debug)]
pub struct InMemoryStore<A> {
    state: Mutex<State>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Default for InMemoryStore<A> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            _aggregate: PhantomData,
        }
    }
}

impl<A> InMemoryStore<A> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every outbox record in commit order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.state.lock().unwrap().outbox.clone()
    }

    /// Makes the next `commit` fail with `DomainError::Persistence` before
    /// anything is written.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_commit(&self) {
        self.state.lock().unwrap().fail_next_commit = true;
    }

    /// Makes the next `count` outbox status updates fail as if another
    /// dispatcher had already moved the record out of `pending`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_outbox_updates(&self, count: u32) {
        self.state.lock().unwrap().outbox_update_failures = count;
    }

    /// Appends an outbox record as if another writer had committed it.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_outbox_record(&self, record: OutboxRecord) {
        let mut state = self.state.lock().unwrap();
        state.next_position += 1;
        let mut record = record;
        record.position = state.next_position;
        state.outbox.push(record);
    }

    /// The pending record `id`; status updates only apply to pending records.
    fn pending_mut(state: &mut State, id: Uuid) -> Result<&mut OutboxRecord, DomainError> {
        let gone = || DomainError::Persistence(format!("outbox record {id} not found or no longer pending"));
        if state.outbox_update_failures > 0 {
            state.outbox_update_failures -= 1;
            return Err(gone());
        }
        state
            .outbox
            .iter_mut()
            .find(|record| record.id() == id && record.status == OutboxStatus::Pending)
            .ok_or_else(gone)
    }
}

fn check_version(
    state: &State,
    aggregate_id: Uuid,
    expected_version: i64,
) -> Result<(), DomainError> {
    let (actual, _) = state
        .aggregates
        .get(&aggregate_id)
        .ok_or(DomainError::AggregateNotFound(aggregate_id))?;
    if *actual == expected_version {
        Ok(())
    } else {
        Err(DomainError::ConcurrencyConflict {
            aggregate_id,
            expected: expected_version,
            actual: *actual,
        })
    }
}

fn to_state<A: AggregateRoot>(aggregate: &A) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(aggregate)
        .map_err(|e| DomainError::Infrastructure(format!("state serialization failed: {e}")))
}

#[async_trait]
impl<A: AggregateRoot + 'static> AggregateStore<A> for InMemoryStore<A> {
    async fn load(&self, id: Uuid) -> Result<Option<A>, DomainError> {
        let state = self.state.lock().unwrap();
        state
            .aggregates
            .get(&id)
            .map(|(_, value)| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    DomainError::Infrastructure(format!("state deserialization failed: {e}"))
                })
            })
            .transpose()
    }

    async fn load_all(&self) -> Result<Vec<A>, DomainError> {
        let state = self.state.lock().unwrap();
        state
            .aggregates
            .values()
            .map(|(_, value)| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    DomainError::Infrastructure(format!("state deserialization failed: {e}"))
                })
            })
            .collect()
    }

    async fn commit(
        &self,
        mutation: Mutation<'_, A>,
        outbox: &[OutboxRecord],
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_commit {
            state.fail_next_commit = false;
            return Err(DomainError::Persistence("simulated commit failure".into()));
        }

        match mutation {
            Mutation::Create(aggregate) => {
                let id = aggregate.aggregate_id();
                if let Some((actual, _)) = state.aggregates.get(&id) {
                    return Err(DomainError::ConcurrencyConflict {
                        aggregate_id: id,
                        expected: 0,
                        actual: *actual,
                    });
                }
                let value = to_state(aggregate)?;
                state.aggregates.insert(id, (aggregate.version(), value));
            }
            Mutation::Update {
                aggregate,
                expected_version,
            } => {
                let id = aggregate.aggregate_id();
                check_version(&state, id, expected_version)?;
                let value = to_state(aggregate)?;
                state.aggregates.insert(id, (aggregate.version(), value));
            }
            Mutation::Delete {
                aggregate,
                expected_version,
            } => {
                let id = aggregate.aggregate_id();
                check_version(&state, id, expected_version)?;
                state.aggregates.remove(&id);
            }
        }

        for record in outbox {
            state.next_position += 1;
            let mut record = record.clone();
            record.position = state.next_position;
            state.outbox.push(record);
        }
        Ok(())
    }
}

#[async_trait]
impl<A: Send + Sync + 'static> OutboxRepository for InMemoryStore<A> {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, DomainError> {
        let mut state = self.state.lock().unwrap();
        let mut blocked: HashSet<Uuid> = HashSet::new();
        let mut claimed = Vec::new();

        for record in &mut state.outbox {
            if claimed.len() >= limit {
                break;
            }
            if record.status != OutboxStatus::Pending {
                continue;
            }
            // Only the oldest pending record of an aggregate is claimable.
            if !blocked.insert(record.event.aggregate_id) {
                continue;
            }
            if record.next_attempt_at <= now {
                record.next_attempt_at = lease_until;
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_dispatched(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let record = Self::pending_mut(&mut state, id)?;
        record.status = OutboxStatus::Dispatched;
        record.dispatched_at = Some(at);
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let record = Self::pending_mut(&mut state, id)?;
        record.attempts = attempts;
        record.next_attempt_at = next_attempt_at;
        record.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn dead_letter(&self, id: Uuid, attempts: i32, error: &str) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let record = Self::pending_mut(&mut state, id)?;
        record.status = OutboxStatus::DeadLettered;
        record.attempts = attempts;
        record.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn purge_dispatched(&self, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut state = self.state.lock().unwrap();
        let initial = state.outbox.len();
        state.outbox.retain(|record| {
            !(record.status == OutboxStatus::Dispatched
                && record.dispatched_at.is_some_and(|at| at < before))
        });
        Ok((initial - state.outbox.len()) as u64)
    }
}

/// An aggregate store that always returns a persistence error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingAggregateStore;

#[async_trait]
impl<A: AggregateRoot + 'static> AggregateStore<A> for FailingAggregateStore {
    async fn load(&self, _id: Uuid) -> Result<Option<A>, DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }

    async fn load_all(&self) -> Result<Vec<A>, DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }

    async fn commit(
        &self,
        _mutation: Mutation<'_, A>,
        _outbox: &[OutboxRecord],
    ) -> Result<(), DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }
}
