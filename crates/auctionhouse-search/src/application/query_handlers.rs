//! Query handlers for the Search context.

use auctionhouse_core::error::DomainError;
use auctionhouse_core::projection::ProjectionStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::items::SearchItem;

/// Page size used when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 4;
/// Largest page size a caller may ask for.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Window within which a live auction counts as ending soon.
pub const ENDING_SOON_HOURS: i64 = 6;

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    /// Alphabetical by make, then model.
    Make,
    /// Newest listings first.
    New,
    /// Soonest to end first.
    #[default]
    End,
}

/// Which auctions to include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterBy {
    /// Still open for bids.
    #[default]
    Live,
    /// Already ended.
    Finished,
    /// Open, ending within six hours.
    EndingSoon,
}

/// Search request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Case-insensitive text matched against make, model and color.
    pub search_term: Option<String>,
    /// Only auctions listed by this seller.
    pub seller: Option<String>,
    /// Sort order of the results.
    pub order_by: OrderBy,
    /// Which auctions to include.
    pub filter_by: FilterBy,
    /// One-based page index.
    pub page_number: u32,
    /// Items per page, between 1 and 100.
    pub page_size: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            search_term: None,
            seller: None,
            order_by: OrderBy::default(),
            filter_by: FilterBy::default(),
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Items on the requested page.
    pub results: Vec<SearchItem>,
    /// Number of pages for the whole result set.
    pub page_count: u32,
    /// Number of matching items across all pages.
    pub total_count: usize,
}

/// Searches the local projection.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a zero page number or a page size
/// outside `1..=100`, or the store's error if it cannot be read.
pub async fn search_items(
    params: &SearchParams,
    now: DateTime<Utc>,
    store: &dyn ProjectionStore<SearchItem>,
) -> Result<SearchResult, DomainError> {
    if params.page_number == 0 {
        return Err(DomainError::Validation("page_number must be at least 1".into()));
    }
    if params.page_size == 0 || params.page_size > MAX_PAGE_SIZE {
        return Err(DomainError::Validation(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let ending_soon = now + Duration::hours(ENDING_SOON_HOURS);
    let term = params
        .search_term
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty());

    let mut items: Vec<SearchItem> = store
        .list()
        .await?
        .into_iter()
        .filter(|item| match params.filter_by {
            FilterBy::Live => item.auction_end > now,
            FilterBy::Finished => item.auction_end <= now,
            FilterBy::EndingSoon => item.auction_end > now && item.auction_end <= ending_soon,
        })
        .filter(|item| params.seller.as_ref().is_none_or(|seller| &item.seller == seller))
        .filter(|item| term.is_none_or(|term| item.matches_term(term)))
        .collect();

    match params.order_by {
        OrderBy::Make => items.sort_by(|a, b| a.make.cmp(&b.make).then_with(|| a.model.cmp(&b.model))),
        OrderBy::New => items.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        OrderBy::End => items.sort_by(|a, b| a.auction_end.cmp(&b.auction_end)),
    }

    let total_count = items.len();
    let page_size = params.page_size as usize;
    let page_count = u32::try_from(total_count.div_ceil(page_size)).unwrap_or(u32::MAX);
    let skip = (params.page_number as usize - 1).saturating_mul(page_size);
    let results = items.into_iter().skip(skip).take(page_size).collect();

    Ok(SearchResult {
        results,
        page_count,
        total_count,
    })
}
