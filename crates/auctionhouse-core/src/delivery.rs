//! Durable per-subscription delivery log used by the message bus.
//!
//! Every published event becomes one delivery row per matching subscription.
//! A row stays `pending` until its handler acknowledges it or the bus gives up
//! on it, so accepted events survive a restart of the consuming process.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::bus::DeadLetter;
use crate::error::DomainError;
use crate::event::IntegrationEvent;

/// Lifecycle state of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Accepted by the bus, not yet acknowledged.
    Pending,
    /// Acknowledged by the subscription's handler.
    Acked,
    /// The subscription gave up on the event.
    DeadLettered,
}

impl DeliveryStatus {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acked => "acked",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "acked" => Ok(Self::Acked),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(DomainError::Infrastructure(format!(
                "unknown delivery status: {other}"
            ))),
        }
    }
}

/// One event queued for one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Acceptance order assigned by the store.
    pub position: i64,
    /// Durable subscription name.
    pub subscription: String,
    /// The event to hand to the subscription's handler.
    pub event: IntegrationEvent,
    /// Current lifecycle state.
    pub status: DeliveryStatus,
    /// Failed deliveries so far.
    pub deliveries: i32,
    /// Earliest time the delivery may be (re)claimed.
    pub next_attempt_at: DateTime<Utc>,
    /// Reason given by the last failed delivery, if any.
    pub last_error: Option<String>,
    /// When the bus accepted the event.
    pub created_at: DateTime<Utc>,
    /// When the delivery was acknowledged or dead-lettered.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Delivery {
    /// A fresh pending delivery, due immediately.
    #[must_use]
    pub fn pending(subscription: &str, event: IntegrationEvent, now: DateTime<Utc>) -> Self {
        Self {
            position: 0,
            subscription: subscription.to_owned(),
            event,
            status: DeliveryStatus::Pending,
            deliveries: 0,
            next_attempt_at: now,
            last_error: None,
            created_at: now,
            settled_at: None,
        }
    }
}

impl From<Delivery> for DeadLetter {
    fn from(delivery: Delivery) -> Self {
        Self {
            subscription: delivery.subscription,
            event: delivery.event,
            reason: delivery.last_error.unwrap_or_default(),
            deliveries: u32::try_from(delivery.deliveries).unwrap_or(0),
            failed_at: delivery.settled_at.unwrap_or(delivery.next_attempt_at),
        }
    }
}

/// Storage operations used by the durable message bus.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Records (or updates) the event types a durable subscription receives.
    /// Events accepted afterwards are queued for it even while no consumer is
    /// running.
    async fn register_subscription(
        &self,
        subscription: &str,
        event_types: &[&str],
        at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Queues `event` for every registered subscription of its type and
    /// returns how many deliveries were created. Accepting the same event
    /// twice creates no new deliveries.
    async fn enqueue(&self, event: &IntegrationEvent, now: DateTime<Utc>) -> Result<usize, DomainError>;

    /// Claims up to `limit` due pending deliveries of `subscription`, oldest
    /// first.
    ///
    /// A delivery is due when `next_attempt_at <= now` and no earlier pending
    /// delivery exists for the same subscription and aggregate. Claimed
    /// deliveries are leased until `lease_until`.
    async fn claim_due(
        &self,
        subscription: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Delivery>, DomainError>;

    /// Marks a pending delivery as acknowledged.
    async fn ack(&self, subscription: &str, event_id: Uuid, at: DateTime<Utc>) -> Result<(), DomainError>;

    /// Records a failed delivery and when to try again.
    async fn schedule_redelivery(
        &self,
        subscription: &str,
        event_id: Uuid,
        deliveries: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), DomainError>;

    /// Moves a pending delivery to the dead-letter state.
    async fn dead_letter(
        &self,
        subscription: &str,
        event_id: Uuid,
        deliveries: i32,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError>;

    /// Every dead-lettered delivery, oldest first.
    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, DomainError>;

    /// Deletes deliveries of `subscription` acknowledged before `before`;
    /// returns how many.
    async fn purge_acked(&self, subscription: &str, before: DateTime<Utc>) -> Result<u64, DomainError>;
}
