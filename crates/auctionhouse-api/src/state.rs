//! Shared application state.

use std::sync::Arc;

use auctionhouse_auction::domain::aggregates::Auction;
use auctionhouse_core::clock::Clock;
use auctionhouse_core::projection::ProjectionStore;
use auctionhouse_core::repository::AggregateStore;
use auctionhouse_search::domain::items::SearchItem;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock used to timestamp changes and evaluate auction end times.
    pub clock: Arc<dyn Clock>,
    /// Store of the Auction context (aggregates and outbox).
    pub auction_store: Arc<dyn AggregateStore<Auction>>,
    /// Search projection owned by the Search context.
    pub search_store: Arc<dyn ProjectionStore<SearchItem>>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        auction_store: Arc<dyn AggregateStore<Auction>>,
        search_store: Arc<dyn ProjectionStore<SearchItem>>,
    ) -> Self {
        Self {
            clock,
            auction_store,
            search_store,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
