//! Idempotent consumer that keeps the search projection in step with the
//! Auction context.
//!
//! The projection store rejects any sequence number that is not newer than the
//! last one applied for the auction, so redelivered, duplicated and reordered
//! events all end up as acknowledged no-ops.

use std::sync::Arc;

use async_trait::async_trait;
use auctionhouse_core::bus::{EventHandler, HandleOutcome, Nack};
use auctionhouse_core::event::IntegrationEvent;
use auctionhouse_core::projection::{ApplyOutcome, ProjectionChange, ProjectionStore};
use tracing::{debug, info, instrument, warn};

use crate::domain::events::{
    AUCTION_CREATED, AUCTION_DELETED, AUCTION_UPDATED, AuctionDeletedPayload,
    SUPPORTED_SCHEMA_VERSION,
};
use crate::domain::items::SearchItem;

/// Durable subscription name of the search projection.
pub const SEARCH_SUBSCRIPTION: &str = "search.auction-projection";

/// Applies auction events to the search projection.
pub struct SearchProjector {
    store: Arc<dyn ProjectionStore<SearchItem>>,
}

impl SearchProjector {
    /// Creates a projector writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ProjectionStore<SearchItem>>) -> Self {
        Self { store }
    }

    fn change_for(event: &IntegrationEvent) -> Result<Option<ProjectionChange<SearchItem>>, Nack> {
        if event.schema_version > SUPPORTED_SCHEMA_VERSION {
            return Err(Nack::Permanent(format!(
                "unsupported schema version {} for {}",
                event.schema_version, event.event_type
            )));
        }

        match event.event_type.as_str() {
            AUCTION_CREATED | AUCTION_UPDATED => {
                let item: SearchItem = event
                    .decode_payload()
                    .map_err(|e| Nack::Permanent(format!("malformed payload: {e}")))?;
                if item.id != event.aggregate_id {
                    return Err(Nack::Permanent(format!(
                        "payload id {} does not match aggregate {}",
                        item.id, event.aggregate_id
                    )));
                }
                Ok(Some(ProjectionChange::Upsert(item)))
            }
            AUCTION_DELETED => {
                let deleted: AuctionDeletedPayload = event
                    .decode_payload()
                    .map_err(|e| Nack::Permanent(format!("malformed payload: {e}")))?;
                if deleted.id != event.aggregate_id {
                    return Err(Nack::Permanent(format!(
                        "payload id {} does not match aggregate {}",
                        deleted.id, event.aggregate_id
                    )));
                }
                Ok(Some(ProjectionChange::Remove))
            }
            _ => Ok(None),
        }
    }
}

impl std::fmt::Debug for SearchProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchProjector").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventHandler for SearchProjector {
    #[instrument(
        skip_all,
        fields(
            event_id = %event.event_id,
            event_type = %event.event_type,
            aggregate_id = %event.aggregate_id,
            sequence_number = event.sequence_number,
        )
    )]
    async fn handle(&self, event: &IntegrationEvent) -> HandleOutcome {
        let change = match Self::change_for(event) {
            Ok(Some(change)) => change,
            Ok(None) => {
                debug!("event type not projected, acknowledging");
                return HandleOutcome::Ack;
            }
            Err(nack) => return HandleOutcome::Nack(nack),
        };

        match self
            .store
            .apply(event.aggregate_id, event.sequence_number, change)
            .await
        {
            Ok(ApplyOutcome::Applied) => {
                info!("search projection updated");
                HandleOutcome::Ack
            }
            Ok(ApplyOutcome::Duplicate) => {
                debug!("duplicate delivery ignored");
                HandleOutcome::Ack
            }
            Ok(ApplyOutcome::Stale) => {
                debug!("stale event ignored");
                HandleOutcome::Ack
            }
            Err(e) => {
                warn!(error = %e, "projection write failed");
                HandleOutcome::Nack(Nack::Transient(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use auctionhouse_test_support::{FailingProjectionStore, InMemoryProjectionStore};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn snapshot(id: Uuid, make: &str, model: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "created_at": at(),
            "updated_at": at(),
            "auction_end": at() + Duration::days(3),
            "seller": "alice",
            "status": "Live",
            "reserve_price": 20_000,
            "make": make,
            "model": model,
            "year": 2020,
            "color": "Red",
            "mileage": 1_000,
            "image_url": null,
        })
    }

    fn event(
        event_type: &str,
        aggregate_id: Uuid,
        sequence_number: i64,
        payload: serde_json::Value,
    ) -> IntegrationEvent {
        IntegrationEvent {
            event_id: Uuid::now_v7(),
            event_type: event_type.to_owned(),
            schema_version: 1,
            aggregate_type: "auction".to_owned(),
            aggregate_id,
            sequence_number,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: at(),
            payload,
        }
    }

    fn projector() -> (Arc<InMemoryProjectionStore<SearchItem>>, SearchProjector) {
        let store = Arc::new(InMemoryProjectionStore::<SearchItem>::new());
        let projector = SearchProjector::new(store.clone());
        (store, projector)
    }

    #[tokio::test]
    async fn test_created_event_inserts_item() {
        // Arrange
        let (store, projector) = projector();
        let id = Uuid::new_v4();

        // Act
        let outcome = projector
            .handle(&event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT")))
            .await;

        // Assert
        assert_eq!(outcome, HandleOutcome::Ack);
        let item = store.get(id).await.unwrap().unwrap();
        assert_eq!(item.make, "Ford");
        assert_eq!(item.seller, "alice");
    }

    #[tokio::test]
    async fn test_redelivery_is_acknowledged_without_second_write() {
        // Arrange
        let (store, projector) = projector();
        let id = Uuid::new_v4();
        let created = event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT"));

        // Act
        let first = projector.handle(&created).await;
        let state_after_first = store.get(id).await.unwrap();
        let second = projector.handle(&created).await;

        // Assert
        assert_eq!(first, HandleOutcome::Ack);
        assert_eq!(second, HandleOutcome::Ack);
        assert_eq!(store.get(id).await.unwrap(), state_after_first);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_older_update_is_ignored() {
        let (store, projector) = projector();
        let id = Uuid::new_v4();
        projector
            .handle(&event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT")))
            .await;
        projector
            .handle(&event(AUCTION_UPDATED, id, 3, snapshot(id, "Ford", "Mustang")))
            .await;

        let outcome = projector
            .handle(&event(AUCTION_UPDATED, id, 2, snapshot(id, "Ford", "Focus")))
            .await;

        assert_eq!(outcome, HandleOutcome::Ack);
        assert_eq!(store.get(id).await.unwrap().unwrap().model, "Mustang");
        assert_eq!(store.last_sequence(id).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_update_after_delete_does_not_resurrect_item() {
        // Arrange
        let (store, projector) = projector();
        let id = Uuid::new_v4();
        projector
            .handle(&event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT")))
            .await;
        projector
            .handle(&event(AUCTION_DELETED, id, 3, serde_json::json!({ "id": id })))
            .await;

        // Act
        let outcome = projector
            .handle(&event(AUCTION_UPDATED, id, 2, snapshot(id, "Ford", "Mustang")))
            .await;

        // Assert
        assert_eq!(outcome, HandleOutcome::Ack);
        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_newer_schema_version_is_dead_lettered() {
        let (store, projector) = projector();
        let id = Uuid::new_v4();
        let mut future = event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT"));
        future.schema_version = 2;

        let outcome = projector.handle(&future).await;

        assert!(matches!(outcome, HandleOutcome::Nack(Nack::Permanent(_))));
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered() {
        let (_, projector) = projector();
        let id = Uuid::new_v4();

        let outcome = projector
            .handle(&event(AUCTION_CREATED, id, 1, serde_json::json!({ "id": id })))
            .await;

        assert!(matches!(outcome, HandleOutcome::Nack(Nack::Permanent(_))));
    }

    #[tokio::test]
    async fn test_payload_for_another_aggregate_is_dead_lettered() {
        let (_, projector) = projector();

        let outcome = projector
            .handle(&event(
                AUCTION_CREATED,
                Uuid::new_v4(),
                1,
                snapshot(Uuid::new_v4(), "Ford", "GT"),
            ))
            .await;

        assert!(matches!(outcome, HandleOutcome::Nack(Nack::Permanent(_))));
    }

    #[tokio::test]
    async fn test_unrelated_event_type_is_acknowledged() {
        let (store, projector) = projector();
        let id = Uuid::new_v4();

        let outcome = projector
            .handle(&event("BidPlaced", id, 1, serde_json::json!({ "amount": 10 })))
            .await;

        assert_eq!(outcome, HandleOutcome::Ack);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_transient() {
        let projector = SearchProjector::new(Arc::new(FailingProjectionStore));
        let id = Uuid::new_v4();

        let outcome = projector
            .handle(&event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT")))
            .await;

        assert!(matches!(outcome, HandleOutcome::Nack(Nack::Transient(_))));
    }

    #[tokio::test]
    async fn test_retry_after_transient_failure_applies_once() {
        let (store, projector) = projector();
        let id = Uuid::new_v4();
        let created = event(AUCTION_CREATED, id, 1, snapshot(id, "Ford", "GT"));
        store.fail_next_applies(1);

        let first = projector.handle(&created).await;
        let second = projector.handle(&created).await;

        assert!(matches!(first, HandleOutcome::Nack(Nack::Transient(_))));
        assert_eq!(second, HandleOutcome::Ack);
        assert_eq!(store.writes(), 1);
    }
}
