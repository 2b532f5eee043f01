//! Test projection stores: in-memory `ProjectionStore` implementations.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use async_trait::async_trait;
use auctionhouse_core::error::DomainError;
use auctionhouse_core::projection::{ApplyOutcome, ProjectionChange, ProjectionStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

#[derive(Debug)]
struct Entry {
    last_sequence: i64,
    document: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Uuid, Entry>,
    failures_remaining: u32,
    writes: u32,
}

/// A projection store backed by a map, with the same sequence guard and
/// tombstones as the database implementation.
#[derive(Debug)]
pub struct InMemoryProjectionStore<P> {
    state: Mutex<State>,
    _document: PhantomData<fn() -> P>,
}

impl<P> Default for InMemoryProjectionStore<P> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            _document: PhantomData,
        }
    }
}

impl<P> InMemoryProjectionStore<P> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to `apply` fail with a persistence error.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_applies(&self, count: u32) {
        self.state.lock().unwrap().failures_remaining = count;
    }

    /// Number of changes actually written (duplicates and stale events excluded).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }
}

fn decode<P: DeserializeOwned>(value: &serde_json::Value) -> Result<P, DomainError> {
    P::deserialize(value)
        .map_err(|e| DomainError::Infrastructure(format!("document deserialization failed: {e}")))
}

#[async_trait]
impl<P> ProjectionStore<P> for InMemoryProjectionStore<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn apply(
        &self,
        aggregate_id: Uuid,
        sequence_number: i64,
        change: ProjectionChange<P>,
    ) -> Result<ApplyOutcome, DomainError> {
        let mut state = self.state.lock().unwrap();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(DomainError::Persistence("connection reset".into()));
        }

        let last = state.entries.get(&aggregate_id).map(|e| e.last_sequence);
        let outcome = ApplyOutcome::classify(last, sequence_number);
        if outcome != ApplyOutcome::Applied {
            return Ok(outcome);
        }

        let document = match change {
            ProjectionChange::Upsert(document) => Some(serde_json::to_value(document).map_err(
                |e| DomainError::Infrastructure(format!("document serialization failed: {e}")),
            )?),
            ProjectionChange::Remove => None,
        };
        state.entries.insert(
            aggregate_id,
            Entry {
                last_sequence: sequence_number,
                document,
            },
        );
        state.writes += 1;
        Ok(outcome)
    }

    async fn get(&self, aggregate_id: Uuid) -> Result<Option<P>, DomainError> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .get(&aggregate_id)
            .and_then(|entry| entry.document.as_ref())
            .map(decode)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<P>, DomainError> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .filter_map(|entry| entry.document.as_ref())
            .map(decode)
            .collect()
    }

    async fn last_sequence(&self, aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state.entries.get(&aggregate_id).map(|e| e.last_sequence))
    }
}

/// A projection store that always returns a persistence error.
#[derive(Debug)]
pub struct FailingProjectionStore;

#[async_trait]
impl<P> ProjectionStore<P> for FailingProjectionStore
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn apply(
        &self,
        _aggregate_id: Uuid,
        _sequence_number: i64,
        _change: ProjectionChange<P>,
    ) -> Result<ApplyOutcome, DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }

    async fn get(&self, _aggregate_id: Uuid) -> Result<Option<P>, DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }

    async fn list(&self) -> Result<Vec<P>, DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }

    async fn last_sequence(&self, _aggregate_id: Uuid) -> Result<Option<i64>, DomainError> {
        Err(DomainError::Persistence("connection refused".into()))
    }
}
