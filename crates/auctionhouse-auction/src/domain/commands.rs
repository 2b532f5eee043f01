//! Commands for the Auction context.

use auctionhouse_core::command::Command;
use auctionhouse_core::identity::Identity;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::aggregates::Item;

/// Command to list a new auction.
#[derive(Debug, Clone)]
pub struct CreateAuction {
    /// Unique id of this command.
    pub command_id: Uuid,
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The authenticated caller; becomes the immutable seller.
    pub seller: Identity,
    /// The vehicle being sold.
    pub item: Item,
    /// Reserve price in whole currency units.
    pub reserve_price: i64,
    /// When bidding closes.
    pub auction_end: DateTime<Utc>,
}

/// Partial update of an auction's item. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    /// New make.
    pub make: Option<String>,
    /// New model.
    pub model: Option<String>,
    /// New color.
    pub color: Option<String>,
    /// New mileage.
    pub mileage: Option<i32>,
    /// New model year.
    pub year: Option<i32>,
}

impl ItemPatch {
    /// Returns `current` with every present field of the patch applied.
    #[must_use]
    pub fn apply_to(&self, current: &Item) -> Item {
        Item {
            make: self.make.clone().unwrap_or_else(|| current.make.clone()),
            model: self.model.clone().unwrap_or_else(|| current.model.clone()),
            color: self.color.clone().unwrap_or_else(|| current.color.clone()),
            mileage: self.mileage.unwrap_or(current.mileage),
            year: self.year.unwrap_or(current.year),
            image_url: current.image_url.clone(),
        }
    }
}

/// Command to change the item of an existing auction.
#[derive(Debug, Clone)]
pub struct UpdateAuction {
    /// Unique id of this command.
    pub command_id: Uuid,
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The auction to update.
    pub auction_id: Uuid,
    /// The authenticated caller; must be the seller.
    pub actor: Identity,
    /// The fields to change.
    pub patch: ItemPatch,
}

/// Command to withdraw an auction.
#[derive(Debug, Clone)]
pub struct DeleteAuction {
    /// Unique id of this command.
    pub command_id: Uuid,
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The auction to delete.
    pub auction_id: Uuid,
    /// The authenticated caller; must be the seller.
    pub actor: Identity,
}

impl Command for CreateAuction {
    fn command_type(&self) -> &'static str {
        "auction.create"
    }

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn actor(&self) -> &Identity {
        &self.seller
    }
}

impl Command for UpdateAuction {
    fn command_type(&self) -> &'static str {
        "auction.update"
    }

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn actor(&self) -> &Identity {
        &self.actor
    }
}

impl Command for DeleteAuction {
    fn command_type(&self) -> &'static str {
        "auction.delete"
    }

    fn command_id(&self) -> Uuid {
        self.command_id
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn actor(&self) -> &Identity {
        &self.actor
    }
}
