//! Message bus abstraction.
//!
//! Delivery is at-least-once: a handler may see the same event more than once
//! and must be idempotent. `publish` returns once the bus has durably accepted
//! the event, not once consumers have processed it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::IntegrationEvent;

/// Errors returned by a message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not accept the event right now; the caller retries.
    #[error("message bus unavailable: {0}")]
    Unavailable(String),

    /// The bus refused the event or subscription request.
    #[error("message bus rejected request: {0}")]
    Rejected(String),
}

/// Why a handler refused a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nack {
    /// Temporary failure; the event is redelivered after a backoff.
    Transient(String),
    /// The event can never be processed; it goes to the dead-letter path.
    Permanent(String),
}

/// Result of handling one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Processed (or recognised as already processed) and durable.
    Ack,
    /// Not processed.
    Nack(Nack),
}

/// A consumer of integration events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles one delivery. Called again on redelivery.
    async fn handle(&self, event: &IntegrationEvent) -> HandleOutcome;
}

/// An event a subscription gave up on.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Subscription that failed to process the event.
    pub subscription: String,
    /// The event itself.
    pub event: IntegrationEvent,
    /// Reason reported by the last failed delivery.
    pub reason: String,
    /// Number of deliveries attempted.
    pub deliveries: u32,
    /// When the event was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// Topic-routed, at-least-once transport between services.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Accepts `event` for delivery to every subscription of its type.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Unavailable` if the event was not accepted; nothing
    /// is retried here, the publisher owns retries.
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), BusError>;

    /// Registers `handler` under the durable name `subscription` for the given
    /// event types.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Rejected` if the subscription name is taken or the
    /// bus is closed.
    async fn subscribe(
        &self,
        subscription: &str,
        event_types: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError>;
}
