//! The search projection document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the search projection in the projection store.
pub const SEARCH_PROJECTION: &str = "search_items";

/// One searchable auction.
///
/// Deserializes straight from an `AuctionCreated` / `AuctionUpdated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub auction_end: DateTime<Utc>,
    pub seller: String,
    pub status: String,
    pub reserve_price: i64,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub mileage: i32,
    pub image_url: Option<String>,
}

impl SearchItem {
    /// Case-insensitive match of `term` against make, model and color.
    #[must_use]
    pub fn matches_term(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        [&self.make, &self.model, &self.color]
            .iter()
            .any(|field| field.to_lowercase().contains(&term))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn item() -> SearchItem {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        SearchItem {
            id: Uuid::new_v4(),
            created_at: at,
            updated_at: at,
            auction_end: at,
            seller: "alice".to_owned(),
            status: "Live".to_owned(),
            reserve_price: 0,
            make: "Ford".to_owned(),
            model: "Mustang".to_owned(),
            year: 2020,
            color: "Red".to_owned(),
            mileage: 100,
            image_url: None,
        }
    }

    #[test]
    fn test_matches_term_is_case_insensitive_across_fields() {
        let item = item();

        assert!(item.matches_term("ford"));
        assert!(item.matches_term("STANG"));
        assert!(item.matches_term("red"));
        assert!(!item.matches_term("audi"));
    }

    #[test]
    fn test_deserializes_payload_with_unknown_fields() {
        let expected = item();
        let mut payload = serde_json::to_value(&expected).unwrap();
        payload["bid_count"] = serde_json::json!(3);

        let decoded: SearchItem = serde_json::from_value(payload).unwrap();

        assert_eq!(decoded, expected);
    }
}
