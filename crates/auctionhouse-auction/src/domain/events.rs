//! Integration events for the Auction context.
//!
//! Payloads are flat and always fully populated so consumers never have to
//! guess whether a missing field was omitted or cleared.

use auctionhouse_core::event::{DomainEvent, EventMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregates::AuctionStatus;

/// Event type emitted when an auction is created.
pub const AUCTION_CREATED_EVENT_TYPE: &str = "AuctionCreated";
/// Event type emitted when an auction's item is updated.
pub const AUCTION_UPDATED_EVENT_TYPE: &str = "AuctionUpdated";
/// Event type emitted when an auction is deleted.
pub const AUCTION_DELETED_EVENT_TYPE: &str = "AuctionDeleted";

/// Public projection of an auction at the moment of a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionSnapshot {
    /// Auction identifier.
    pub id: Uuid,
    /// When the auction was created.
    pub created_at: DateTime<Utc>,
    /// When the auction was last changed.
    pub updated_at: DateTime<Utc>,
    /// When bidding closes.
    pub auction_end: DateTime<Utc>,
    /// Subject name of the seller.
    pub seller: String,
    /// Lifecycle status.
    pub status: AuctionStatus,
    /// Reserve price in whole currency units.
    pub reserve_price: i64,
    /// Vehicle make.
    pub make: String,
    /// Vehicle model.
    pub model: String,
    /// Model year.
    pub year: i32,
    /// Exterior color.
    pub color: String,
    /// Odometer reading.
    pub mileage: i32,
    /// Picture of the vehicle.
    pub image_url: Option<String>,
}

/// Payload of `AuctionDeleted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionDeleted {
    /// The deleted auction.
    pub id: Uuid,
}

/// Event payload variants for the Auction context.
#[derive(Debug, Clone, PartialEq)]
pub enum AuctionEventKind {
    /// A new auction was listed.
    AuctionCreated(AuctionSnapshot),
    /// The item of an auction changed.
    AuctionUpdated(AuctionSnapshot),
    /// An auction was withdrawn.
    AuctionDeleted(AuctionDeleted),
}

impl AuctionEventKind {
    /// Returns the stable event type name of this variant.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AuctionCreated(_) => AUCTION_CREATED_EVENT_TYPE,
            Self::AuctionUpdated(_) => AUCTION_UPDATED_EVENT_TYPE,
            Self::AuctionDeleted(_) => AUCTION_DELETED_EVENT_TYPE,
        }
    }
}

/// Domain event envelope for the Auction context.
#[derive(Debug, Clone)]
pub struct AuctionEvent {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: AuctionEventKind,
}

impl DomainEvent for AuctionEvent {
    fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    fn to_payload(&self) -> serde_json::Value {
        // Serialization of derived Serialize types to Value is infallible.
        match &self.kind {
            AuctionEventKind::AuctionCreated(snapshot)
            | AuctionEventKind::AuctionUpdated(snapshot) => serde_json::to_value(snapshot),
            AuctionEventKind::AuctionDeleted(deleted) => serde_json::to_value(deleted),
        }
        .expect("AuctionEventKind serialization is infallible")
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
