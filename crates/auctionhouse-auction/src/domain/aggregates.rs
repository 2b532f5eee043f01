//! Aggregate roots for the Auction context.

use auctionhouse_core::aggregate::AggregateRoot;
use auctionhouse_core::clock::Clock;
use auctionhouse_core::error::DomainError;
use auctionhouse_core::event::{EventContext, EventMetadata};
use auctionhouse_core::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::ItemPatch;
use super::events::{AuctionDeleted, AuctionEvent, AuctionEventKind, AuctionSnapshot};

/// Earliest model year accepted for a listing.
const MIN_YEAR: i32 = 1900;
/// Latest model year accepted for a listing.
const MAX_YEAR: i32 = 2100;

/// Lifecycle status of an auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuctionStatus {
    /// Accepting bids.
    Live,
    /// Closed with a winning bid.
    Finished,
    /// Closed without reaching the reserve price.
    ReserveNotMet,
}

/// The vehicle being auctioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
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

impl Item {
    /// Checks the item fields.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` naming the first invalid field.
    pub fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("make", &self.make),
            ("model", &self.model),
            ("color", &self.color),
        ] {
            if value.trim().is_empty() {
                return Err(DomainError::Validation(format!("{field} must not be empty")));
            }
        }
        if self.mileage < 0 {
            return Err(DomainError::Validation(
                "mileage must not be negative".into(),
            ));
        }
        if !(MIN_YEAR..=MAX_YEAR).contains(&self.year) {
            return Err(DomainError::Validation(format!(
                "year must be between {MIN_YEAR} and {MAX_YEAR}"
            )));
        }
        Ok(())
    }
}

/// The aggregate root for an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    /// Aggregate identifier.
    pub id: Uuid,
    /// Current version; bumped once per recorded event.
    pub(crate) version: i64,
    /// Reserve price in whole currency units.
    pub(crate) reserve_price: i64,
    /// Subject name of the seller. Set on creation, never changed.
    seller: String,
    /// When the auction was created.
    pub(crate) created_at: DateTime<Utc>,
    /// When the auction was last changed.
    pub(crate) updated_at: DateTime<Utc>,
    /// When bidding closes.
    pub(crate) auction_end: DateTime<Utc>,
    /// Lifecycle status.
    pub(crate) status: AuctionStatus,
    /// The vehicle being sold.
    pub(crate) item: Item,
    /// Uncommitted events pending persistence.
    #[serde(skip)]
    uncommitted_events: Vec<AuctionEvent>,
}

impl Auction {
    /// Lists a new auction owned by `seller`, producing an `AuctionCreated`
    /// event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item is invalid, the reserve
    /// price is negative or the end time is not in the future.
    pub fn create(
        seller: &Identity,
        item: Item,
        reserve_price: i64,
        auction_end: DateTime<Utc>,
        context: EventContext,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        item.validate()?;
        if reserve_price < 0 {
            return Err(DomainError::Validation(
                "reserve price must not be negative".into(),
            ));
        }
        let now = clock.now();
        if auction_end <= now {
            return Err(DomainError::Validation(
                "auction end must be in the future".into(),
            ));
        }

        let mut auction = Self {
            id: Uuid::now_v7(),
            version: 0,
            reserve_price,
            seller: seller.as_str().to_owned(),
            created_at: now,
            updated_at: now,
            auction_end,
            status: AuctionStatus::Live,
            item,
            uncommitted_events: Vec::new(),
        };
        let snapshot = auction.snapshot();
        auction.record(
            AuctionEventKind::AuctionCreated(snapshot),
            context,
            now,
        );
        Ok(auction)
    }

    /// Returns the seller's subject name.
    #[must_use]
    pub fn seller(&self) -> &str {
        &self.seller
    }

    /// Returns the embedded item.
    #[must_use]
    pub fn item(&self) -> &Item {
        &self.item
    }

    /// Returns when the auction was last changed.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Fails with `Forbidden` unless `actor` is the seller.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Forbidden` on an ownership mismatch.
    pub fn ensure_owned_by(&self, actor: &Identity) -> Result<(), DomainError> {
        if self.seller == actor.as_str() {
            Ok(())
        } else {
            Err(DomainError::Forbidden {
                aggregate_id: self.id,
                actor: actor.to_string(),
            })
        }
    }

    /// Applies `patch` to the item, producing an `AuctionUpdated` event with
    /// the full post-update state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Forbidden` if `actor` is not the seller, or
    /// `DomainError::Validation` if the patched item is invalid.
    pub fn update_item(
        &mut self,
        actor: &Identity,
        patch: &ItemPatch,
        context: EventContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_owned_by(actor)?;
        let item = patch.apply_to(&self.item);
        item.validate()?;

        let now = clock.now();
        self.item = item;
        self.updated_at = now;
        let snapshot = self.snapshot();
        self.record(
            AuctionEventKind::AuctionUpdated(snapshot),
            context,
            now,
        );
        Ok(())
    }

    /// Withdraws the auction, producing an `AuctionDeleted` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Forbidden` if `actor` is not the seller.
    pub fn delete(
        &mut self,
        actor: &Identity,
        context: EventContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        self.ensure_owned_by(actor)?;
        let now = clock.now();
        self.record(
            AuctionEventKind::AuctionDeleted(AuctionDeleted { id: self.id }),
            context,
            now,
        );
        Ok(())
    }

    /// Public projection of the current state.
    #[must_use]
    pub fn snapshot(&self) -> AuctionSnapshot {
        AuctionSnapshot {
            id: self.id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            auction_end: self.auction_end,
            seller: self.seller.clone(),
            status: self.status,
            reserve_price: self.reserve_price,
            make: self.item.make.clone(),
            model: self.item.model.clone(),
            year: self.item.year,
            color: self.item.color.clone(),
            mileage: self.item.mileage,
            image_url: self.item.image_url.clone(),
        }
    }

    fn record(&mut self, kind: AuctionEventKind, context: EventContext, now: DateTime<Utc>) {
        self.version += 1;
        let event = AuctionEvent {
            metadata: EventMetadata {
                event_id: Uuid::now_v7(),
                event_type: kind.event_type().to_owned(),
                aggregate_id: self.id,
                sequence_number: self.version,
                correlation_id: context.correlation_id,
                causation_id: context.causation_id,
                occurred_at: now,
            },
            kind,
        };
        self.uncommitted_events.push(event);
    }
}

impl AggregateRoot for Auction {
    type Event = AuctionEvent;

    const AGGREGATE_TYPE: &'static str = "auction";

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn uncommitted_events(&self) -> &[Self::Event] {
        &self.uncommitted_events
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted_events.clear();
    }
}
