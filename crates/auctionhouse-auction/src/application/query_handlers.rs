//! Query handlers for the Auction context.
//!
//! These read straight from the auction service's own store and return
//! read-only view DTOs.

use auctionhouse_core::aggregate::AggregateRoot;
use auctionhouse_core::error::DomainError;
use auctionhouse_core::repository::AggregateStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{Auction, AuctionStatus};

/// Read-only view of an auction aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuctionView {
    /// Auction identifier.
    pub id: Uuid,
    /// Reserve price in whole currency units.
    pub reserve_price: i64,
    /// Subject name of the seller.
    pub seller: String,
    /// When the auction was created.
    pub created_at: DateTime<Utc>,
    /// When the auction was last changed.
    pub updated_at: DateTime<Utc>,
    /// When bidding closes.
    pub auction_end: DateTime<Utc>,
    /// Lifecycle status.
    pub status: AuctionStatus,
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
    /// Concurrency token.
    pub version: i64,
}

impl From<&Auction> for AuctionView {
    fn from(auction: &Auction) -> Self {
        Self {
            id: auction.id,
            reserve_price: auction.reserve_price,
            seller: auction.seller().to_owned(),
            created_at: auction.created_at,
            updated_at: auction.updated_at,
            auction_end: auction.auction_end,
            status: auction.status,
            make: auction.item.make.clone(),
            model: auction.item.model.clone(),
            year: auction.item.year,
            color: auction.item.color.clone(),
            mileage: auction.item.mileage,
            image_url: auction.item.image_url.clone(),
            version: auction.version(),
        }
    }
}

/// Lists auctions ordered by make, optionally only those updated after
/// `updated_after`.
///
/// # Errors
///
/// Returns `DomainError` if the store cannot be read.
pub async fn get_auctions(
    updated_after: Option<DateTime<Utc>>,
    store: &dyn AggregateStore<Auction>,
) -> Result<Vec<AuctionView>, DomainError> {
    let mut auctions: Vec<AuctionView> = store
        .load_all()
        .await?
        .iter()
        .filter(|auction| updated_after.is_none_or(|after| auction.updated_at > after))
        .map(AuctionView::from)
        .collect();
    auctions.sort_by(|a, b| a.make.cmp(&b.make).then(a.id.cmp(&b.id)));
    Ok(auctions)
}

/// Retrieves an auction by its aggregate ID.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no auction exists for the ID.
pub async fn get_auction_by_id(
    auction_id: Uuid,
    store: &dyn AggregateStore<Auction>,
) -> Result<AuctionView, DomainError> {
    store
        .load(auction_id)
        .await?
        .as_ref()
        .map(AuctionView::from)
        .ok_or(DomainError::AggregateNotFound(auction_id))
}
