//! Domain and integration event abstractions.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version of every integration event this workspace emits.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate version after the change this event describes.
    pub sequence_number: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Correlation and causation ids stamped onto the events a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventContext {
    /// Id of the originating request, shared by everything it causes.
    pub correlation_id: Uuid,
    /// Id of the command that directly caused the events.
    pub causation_id: Uuid,
}

/// Trait that all domain events implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type name (used for routing on the bus).
    fn event_type(&self) -> &'static str;

    /// Returns the wire schema version of the payload.
    fn schema_version(&self) -> i32 {
        CURRENT_SCHEMA_VERSION
    }

    /// Serializes the event payload to JSON.
    fn to_payload(&self) -> serde_json::Value;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;
}

/// Immutable, versioned message broadcast to other services after a committed
/// state change. This is the shape stored in the outbox and carried on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Unique event identifier; doubles as the outbox record id.
    pub event_id: Uuid,
    /// Stable event kind, e.g. `AuctionCreated`.
    pub event_type: String,
    /// Payload schema version. Consumers reject versions they do not know.
    pub schema_version: i32,
    /// Type of the aggregate that changed.
    pub aggregate_type: String,
    /// Aggregate that changed.
    pub aggregate_id: Uuid,
    /// Aggregate version after the change; monotonic per aggregate.
    pub sequence_number: i64,
    /// Correlation ID of the originating request.
    pub correlation_id: Uuid,
    /// Causation ID of the originating command.
    pub causation_id: Uuid,
    /// When the change happened.
    pub occurred_at: DateTime<Utc>,
    /// Flat projection of the aggregate's public fields.
    pub payload: serde_json::Value,
}

impl IntegrationEvent {
    /// Builds the integration event for a domain event of `aggregate_type`.
    pub fn from_domain<E: DomainEvent + ?Sized>(aggregate_type: &str, event: &E) -> Self {
        let meta = event.metadata();
        Self {
            event_id: meta.event_id,
            event_type: event.event_type().to_owned(),
            schema_version: event.schema_version(),
            aggregate_type: aggregate_type.to_owned(),
            aggregate_id: meta.aggregate_id,
            sequence_number: meta.sequence_number,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
            payload: event.to_payload(),
        }
    }

    /// Deserializes the payload into `T`. Unknown fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload does not match `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}
