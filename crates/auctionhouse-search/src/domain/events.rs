//! Inbound integration events consumed from the Auction context.
//!
//! Only the event names and the payload fields this context needs are
//! declared here. Fields added by the publisher later are ignored.

use serde::Deserialize;
use uuid::Uuid;

/// Highest payload schema version this context understands.
pub const SUPPORTED_SCHEMA_VERSION: i32 = 1;

/// An auction was listed.
pub const AUCTION_CREATED: &str = "AuctionCreated";
/// An auction's item changed.
pub const AUCTION_UPDATED: &str = "AuctionUpdated";
/// An auction was withdrawn.
pub const AUCTION_DELETED: &str = "AuctionDeleted";

/// Event types the search projection subscribes to.
pub const SUBSCRIBED_EVENT_TYPES: &[&str] = &[AUCTION_CREATED, AUCTION_UPDATED, AUCTION_DELETED];

/// Payload of `AuctionDeleted`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuctionDeletedPayload {
    /// The withdrawn auction.
    pub id: Uuid,
}
