//! Routes for the Auction bounded context.

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use auctionhouse_auction::application::command_handlers;
use auctionhouse_auction::application::query_handlers::{self, AuctionView};
use auctionhouse_auction::domain::aggregates::Item;
use auctionhouse_auction::domain::commands;

use crate::error::ApiError;
use crate::extract::AuthenticatedUser;
use crate::state::AppState;

/// Query string of GET /api/auctions.
#[derive(Debug, Default, Deserialize)]
pub struct ListAuctionsQuery {
    /// Only auctions updated after this instant.
    pub date: Option<DateTime<Utc>>,
}

/// Request body for POST /api/auctions.
#[derive(Debug, Deserialize)]
pub struct CreateAuctionRequest {
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
    #[serde(default)]
    pub image_url: Option<String>,
    /// Reserve price in whole currency units; zero when omitted.
    #[serde(default)]
    pub reserve_price: i64,
    /// When bidding closes. Must be in the future.
    pub auction_end: DateTime<Utc>,
}

/// Request body for PUT /api/auctions/{id}. Absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateAuctionRequest {
    /// New make.
    pub make: Option<String>,
    /// New model.
    pub model: Option<String>,
    /// New color.
    pub color: Option<String>,
    /// New odometer reading.
    pub mileage: Option<i32>,
    /// New model year.
    pub year: Option<i32>,
}

/// GET /api/auctions
#[instrument(skip(state))]
async fn list_auctions(
    State(state): State<AppState>,
    Query(query): Query<ListAuctionsQuery>,
) -> Result<Json<Vec<AuctionView>>, ApiError> {
    let auctions = query_handlers::get_auctions(query.date, &*state.auction_store).await?;
    Ok(Json(auctions))
}

/// GET /api/auctions/{id}
#[instrument(skip(state))]
async fn get_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<Uuid>,
) -> Result<Json<AuctionView>, ApiError> {
    let auction = query_handlers::get_auction_by_id(auction_id, &*state.auction_store).await?;
    Ok(Json(auction))
}

/// POST /api/auctions
#[instrument(skip(state, request), fields(seller = %user.0))]
async fn create_auction(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CreateAuctionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let command = commands::CreateAuction {
        command_id: Uuid::new_v4(),
        correlation_id: Uuid::new_v4(),
        seller: user.0,
        item: Item {
            make: request.make,
            model: request.model,
            year: request.year,
            color: request.color,
            mileage: request.mileage,
            image_url: request.image_url,
        },
        reserve_price: request.reserve_price,
        auction_end: request.auction_end,
    };

    info!(correlation_id = %command.correlation_id, "handling create_auction command");

    let result = command_handlers::handle_create_auction(
        &command,
        state.clock.as_ref(),
        &*state.auction_store,
    )
    .await?;

    let location = format!("/api/auctions/{}", result.aggregate_id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(result.auction),
    ))
}

/// PUT /api/auctions/{id}
#[instrument(skip(state, request), fields(actor = %user.0))]
async fn update_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(request): Json<UpdateAuctionRequest>,
) -> Result<Json<AuctionView>, ApiError> {
    let command = commands::UpdateAuction {
        command_id: Uuid::new_v4(),
        correlation_id: Uuid::new_v4(),
        auction_id,
        actor: user.0,
        patch: commands::ItemPatch {
            make: request.make,
            model: request.model,
            color: request.color,
            mileage: request.mileage,
            year: request.year,
        },
    };

    info!(correlation_id = %command.correlation_id, "handling update_auction command");

    let result = command_handlers::handle_update_auction(
        &command,
        state.clock.as_ref(),
        &*state.auction_store,
    )
    .await?;

    Ok(Json(result.auction))
}

/// DELETE /api/auctions/{id}
#[instrument(skip(state), fields(actor = %user.0))]
async fn delete_auction(
    State(state): State<AppState>,
    Path(auction_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> Result<Json<AuctionView>, ApiError> {
    let command = commands::DeleteAuction {
        command_id: Uuid::new_v4(),
        correlation_id: Uuid::new_v4(),
        auction_id,
        actor: user.0,
    };

    info!(correlation_id = %command.correlation_id, "handling delete_auction command");

    let result = command_handlers::handle_delete_auction(
        &command,
        state.clock.as_ref(),
        &*state.auction_store,
    )
    .await?;

    Ok(Json(result.auction))
}

/// Returns the router for the auction context.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auctions", get(list_auctions).post(create_auction))
        .route(
            "/api/auctions/{id}",
            get(get_auction).put(update_auction).delete(delete_auction),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use auctionhouse_auction::domain::aggregates::Auction;
    use auctionhouse_core::repository::AggregateStore;
    use auctionhouse_search::domain::items::SearchItem;
    use auctionhouse_test_support::{
        FailingAggregateStore, FixedClock, InMemoryProjectionStore, InMemoryStore,
    };
    use axum::body::Body;
    use axum::http::Request;
    use chrono::TimeZone;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::extract::AUTHENTICATED_USER_HEADER;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
    }

    fn app_state_with(auction_store: Arc<dyn AggregateStore<Auction>>) -> AppState {
        AppState::new(
            Arc::new(FixedClock(now())),
            auction_store,
            Arc::new(InMemoryProjectionStore::<SearchItem>::new()),
        )
    }

    fn app_with(store: Arc<InMemoryStore<Auction>>) -> Router {
        router().with_state(app_state_with(store))
    }

    fn ford() -> Value {
        serde_json::json!({
            "make": "Ford",
            "model": "GT",
            "year": 2020,
            "color": "White",
            "mileage": 50_000,
            "reserve_price": 20_000,
            "auction_end": "2026-02-01T00:00:00Z",
        })
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<&Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(AUTHENTICATED_USER_HEADER, user);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_owned());
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap()
        };
        (status, location, json)
    }

    async fn create(store: &Arc<InMemoryStore<Auction>>, user: &str) -> Uuid {
        let (status, _, json) = send(
            app_with(store.clone()),
            request("POST", "/api/auctions", Some(user), Some(&ford())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_auction_returns_201_with_location_and_body() {
        // Arrange
        let store = Arc::new(InMemoryStore::<Auction>::new());
        let app = app_with(store.clone());

        // Act
        let (status, location, json) = send(
            app,
            request("POST", "/api/auctions", Some("alice"), Some(&ford())),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["make"], "Ford");
        assert_eq!(json["seller"], "alice");
        assert_eq!(json["status"], "Live");
        assert_eq!(
            location.unwrap(),
            format!("/api/auctions/{}", json["id"].as_str().unwrap())
        );
        assert_eq!(store.outbox_records().len(), 1);
    }

    #[tokio::test]
    async fn test_create_auction_without_identity_returns_401() {
        let store = Arc::new(InMemoryStore::<Auction>::new());

        let (status, _, json) = send(
            app_with(store.clone()),
            request("POST", "/api/auctions", None, Some(&ford())),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"], "unauthenticated");
        assert!(store.outbox_records().is_empty());
    }

    #[tokio::test]
    async fn test_create_auction_with_invalid_item_returns_400() {
        let store = Arc::new(InMemoryStore::<Auction>::new());
        let mut body = ford();
        body["make"] = Value::from("");

        let (status, _, json) = send(
            app_with(store),
            request("POST", "/api/auctions", Some("alice"), Some(&body)),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_create_auction_returns_400_when_commit_fails() {
        // Arrange
        let app = router().with_state(app_state_with(Arc::new(FailingAggregateStore)));

        // Act
        let (status, _, json) = send(
            app,
            request("POST", "/api/auctions", Some("alice"), Some(&ford())),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "persistence_failure");
    }

    #[tokio::test]
    async fn test_get_auction_returns_404_for_unknown_id() {
        let store = Arc::new(InMemoryStore::<Auction>::new());

        let (status, _, json) = send(
            app_with(store),
            request("GET", &format!("/api/auctions/{}", Uuid::new_v4()), None, None),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "aggregate_not_found");
    }

    #[tokio::test]
    async fn test_list_auctions_filters_by_date() {
        // Arrange
        let store = Arc::new(InMemoryStore::<Auction>::new());
        create(&store, "alice").await;

        // Act
        let (all_status, _, all) =
            send(app_with(store.clone()), request("GET", "/api/auctions", None, None)).await;
        let (_, _, none) = send(
            app_with(store.clone()),
            request("GET", "/api/auctions?date=2026-01-16T00:00:00Z", None, None),
        )
        .await;

        // Assert
        assert_eq!(all_status, StatusCode::OK);
        assert_eq!(all.as_array().unwrap().len(), 1);
        assert!(none.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_auctions_rejects_malformed_date() {
        let store = Arc::new(InMemoryStore::<Auction>::new());

        let (status, _, _) = send(
            app_with(store),
            request("GET", "/api/auctions?date=yesterday", None, None),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_update_auction_by_seller_returns_200_with_new_state() {
        // Arrange
        let store = Arc::new(InMemoryStore::<Auction>::new());
        let id = create(&store, "alice").await;
        let patch = serde_json::json!({ "model": "Mustang" });

        // Act
        let (status, _, json) = send(
            app_with(store.clone()),
            request("PUT", &format!("/api/auctions/{id}"), Some("alice"), Some(&patch)),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["model"], "Mustang");
        assert_eq!(json["make"], "Ford");
        assert_eq!(json["version"], 2);
        assert_eq!(store.outbox_records().len(), 2);
    }

    #[tokio::test]
    async fn test_update_auction_by_non_owner_returns_403() {
        let store = Arc::new(InMemoryStore::<Auction>::new());
        let id = create(&store, "alice").await;
        let patch = serde_json::json!({ "model": "Mustang" });

        let (status, _, json) = send(
            app_with(store.clone()),
            request("PUT", &format!("/api/auctions/{id}"), Some("bob"), Some(&patch)),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "forbidden");
        assert_eq!(store.outbox_records().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_auction_by_seller_returns_200_and_removes_it() {
        // Arrange
        let store = Arc::new(InMemoryStore::<Auction>::new());
        let id = create(&store, "alice").await;

        // Act
        let (status, _, json) = send(
            app_with(store.clone()),
            request("DELETE", &format!("/api/auctions/{id}"), Some("alice"), None),
        )
        .await;
        let (after_status, _, _) = send(
            app_with(store.clone()),
            request("GET", &format!("/api/auctions/{id}"), None, None),
        )
        .await;

        // Assert
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["id"], id.to_string());
        assert_eq!(after_status, StatusCode::NOT_FOUND);
        assert_eq!(store.outbox_records().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_auction_returns_404_for_unknown_id() {
        let store = Arc::new(InMemoryStore::<Auction>::new());

        let (status, _, _) = send(
            app_with(store.clone()),
            request("DELETE", &format!("/api/auctions/{}", Uuid::new_v4()), Some("alice"), None),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(store.outbox_records().is_empty());
    }
}
