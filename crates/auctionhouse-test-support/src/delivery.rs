//! In-memory `DeliveryRepository`. Sharing one instance between two bus
//! instances models a process restart over the same database.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use auctionhouse_core::bus::DeadLetter;
use auctionhouse_core::delivery::{Delivery, DeliveryRepository, DeliveryStatus};
use auctionhouse_core::error::DomainError;
use auctionhouse_core::event::IntegrationEvent;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    subscriptions: HashMap<String, HashSet<String>>,
    deliveries: Vec<Delivery>,
    next_position: i64,
    enqueue_failures: u32,
}

/// Delivery log kept in a `Vec`, in acceptance order.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    state: Mutex<State>,
}

impl InMemoryDeliveryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every delivery in acceptance order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().unwrap().deliveries.clone()
    }

    /// Makes the next `count` calls to `enqueue` fail with
    /// `DomainError::Persistence`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_next_enqueues(&self, count: u32) {
        self.state.lock().unwrap().enqueue_failures = count;
    }

    fn pending_mut<'a>(
        state: &'a mut State,
        subscription: &str,
        event_id: Uuid,
    ) -> Result<&'a mut Delivery, DomainError> {
        state
            .deliveries
            .iter_mut()
            .find(|d| {
                d.subscription == subscription
                    && d.event.event_id == event_id
                    && d.status == DeliveryStatus::Pending
            })
            .ok_or_else(|| {
                DomainError::Persistence(format!(
                    "delivery {event_id} for {subscription} not found or no longer pending"
                ))
            })
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryDeliveryStore {
    async fn register_subscription(
        &self,
        subscription: &str,
        event_types: &[&str],
        _at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.insert(
            subscription.to_owned(),
            event_types.iter().map(|t| (*t).to_owned()).collect(),
        );
        Ok(())
    }

    async fn enqueue(&self, event: &IntegrationEvent, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let mut state = self.state.lock().unwrap();
        if state.enqueue_failures > 0 {
            state.enqueue_failures -= 1;
            return Err(DomainError::Persistence("connection reset".into()));
        }

        let mut targets: Vec<String> = state
            .subscriptions
            .iter()
            .filter(|(_, types)| types.contains(&event.event_type))
            .map(|(name, _)| name.clone())
            .collect();
        targets.sort();

        let mut created = 0;
        for subscription in targets {
            let exists = state
                .deliveries
                .iter()
                .any(|d| d.subscription == subscription && d.event.event_id == event.event_id);
            if exists {
                continue;
            }
            state.next_position += 1;
            let mut delivery = Delivery::pending(&subscription, event.clone(), now);
            delivery.position = state.next_position;
            state.deliveries.push(delivery);
            created += 1;
        }
        Ok(created)
    }

    async fn claim_due(
        &self,
        subscription: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>, DomainError> {
        let mut state = self.state.lock().unwrap();
        let mut blocked: HashSet<Uuid> = HashSet::new();
        let mut claimed = Vec::new();

        for delivery in &mut state.deliveries {
            if claimed.len() >= limit {
                break;
            }
            if delivery.subscription != subscription || delivery.status != DeliveryStatus::Pending {
                continue;
            }
            // Only the oldest pending delivery of an aggregate is claimable.
            if !blocked.insert(delivery.event.aggregate_id) {
                continue;
            }
            if delivery.next_attempt_at <= now {
                delivery.next_attempt_at = lease_until;
                claimed.push(delivery.clone());
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, subscription: &str, event_id: Uuid, at: DateTime<Utc>) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let delivery = Self::pending_mut(&mut state, subscription, event_id)?;
        delivery.status = DeliveryStatus::Acked;
        delivery.settled_at = Some(at);
        Ok(())
    }

    async fn schedule_redelivery(
        &self,
        subscription: &str,
        event_id: Uuid,
        deliveries: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let delivery = Self::pending_mut(&mut state, subscription, event_id)?;
        delivery.deliveries = deliveries;
        delivery.next_attempt_at = next_attempt_at;
        delivery.last_error = Some(error.to_owned());
        Ok(())
    }

    async fn dead_letter(
        &self,
        subscription: &str,
        event_id: Uuid,
        deliveries: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut state = self.state.lock().unwrap();
        let delivery = Self::pending_mut(&mut state, subscription, event_id)?;
        delivery.status = DeliveryStatus::DeadLettered;
        delivery.deliveries = deliveries;
        delivery.last_error = Some(error.to_owned());
        delivery.settled_at = Some(at);
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, DomainError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deliveries
            .iter()
            .filter(|d| d.status == DeliveryStatus::DeadLettered)
            .cloned()
            .map(DeadLetter::from)
            .collect())
    }

    async fn purge_acked(&self, subscription: &str, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut state = self.state.lock().unwrap();
        let initial = state.deliveries.len();
        state.deliveries.retain(|d| {
            !(d.subscription == subscription
                && d.status == DeliveryStatus::Acked
                && d.settled_at.is_some_and(|at| at < before))
        });
        Ok((initial - state.deliveries.len()) as u64)
    }
}
