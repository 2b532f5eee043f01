//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

use auctionhouse_api::app;
use auctionhouse_api::extract::AUTHENTICATED_USER_HEADER;
use auctionhouse_api::state::AppState;
use auctionhouse_auction::domain::aggregates::Auction;
use auctionhouse_bus::{BusConfig, DurableBus};
use auctionhouse_core::bus::MessageBus;
use auctionhouse_core::retry::RetryPolicy;
use auctionhouse_outbox::{DispatchReport, DispatcherConfig, OutboxDispatcher};
use auctionhouse_search::application::projector::{SEARCH_SUBSCRIPTION, SearchProjector};
use auctionhouse_search::domain::events::SUBSCRIBED_EVENT_TYPES;
use auctionhouse_search::domain::items::SearchItem;
use auctionhouse_test_support::{
    InMemoryDeliveryStore, InMemoryProjectionStore, InMemoryStore, ManualClock, MockRng,
    RecordingHandler,
};

/// Subscription name of the recording observer.
pub const OBSERVER_SUBSCRIPTION: &str = "test.observer";

/// Fixed timestamp used across all integration tests.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// A bus over `deliveries` with no background consumers; tests drive it
/// with `poll`.
pub fn bus_over(deliveries: &Arc<InMemoryDeliveryStore>, clock: &Arc<ManualClock>) -> Arc<DurableBus> {
    Arc::new(DurableBus::new(
        deliveries.clone(),
        clock.clone(),
        Box::new(MockRng),
        BusConfig {
            workers: 0,
            max_deliveries: 3,
            redelivery: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
            ..BusConfig::default()
        },
    ))
}

/// A dispatcher publishing the outbox of `store` to `bus`.
pub fn dispatcher_over(
    store: &Arc<InMemoryStore<Auction>>,
    bus: &Arc<DurableBus>,
    clock: &Arc<ManualClock>,
) -> OutboxDispatcher {
    OutboxDispatcher::new(
        store.clone(),
        bus.clone(),
        clock.clone(),
        Box::new(MockRng),
        DispatcherConfig::default(),
    )
}

/// The whole write and propagation path in one process: command surface,
/// atomic store + outbox, dispatcher, durable bus, search projector, plus a
/// recording subscriber that observes every delivered event.
pub struct Stack {
    pub clock: Arc<ManualClock>,
    pub store: Arc<InMemoryStore<Auction>>,
    pub search_store: Arc<InMemoryProjectionStore<SearchItem>>,
    pub deliveries: Arc<InMemoryDeliveryStore>,
    pub bus: Arc<DurableBus>,
    pub dispatcher: OutboxDispatcher,
    pub observer: Arc<RecordingHandler>,
    state: AppState,
}

impl Stack {
    pub async fn start() -> Self {
        let clock = Arc::new(ManualClock::new(now()));
        let store = Arc::new(InMemoryStore::<Auction>::new());
        let search_store = Arc::new(InMemoryProjectionStore::<SearchItem>::new());
        let deliveries = Arc::new(InMemoryDeliveryStore::new());

        let bus = bus_over(&deliveries, &clock);
        bus.subscribe(
            SEARCH_SUBSCRIPTION,
            SUBSCRIBED_EVENT_TYPES,
            Arc::new(SearchProjector::new(search_store.clone())),
        )
        .await
        .unwrap();
        let observer = Arc::new(RecordingHandler::new());
        bus.subscribe(OBSERVER_SUBSCRIPTION, SUBSCRIBED_EVENT_TYPES, observer.clone())
            .await
            .unwrap();

        let dispatcher = dispatcher_over(&store, &bus, &clock);
        let state = AppState::new(clock.clone(), store.clone(), search_store.clone());

        Self {
            clock,
            store,
            search_store,
            deliveries,
            bus,
            dispatcher,
            observer,
            state,
        }
    }

    /// A fresh router over the shared state.
    pub fn app(&self) -> Router {
        app(self.state.clone())
    }

    /// Dispatches until the outbox has nothing due.
    pub async fn drain_outbox(&self) -> DispatchReport {
        let mut total = DispatchReport::default();
        loop {
            let report = self.dispatcher.dispatch_once().await.unwrap();
            if report.claimed == 0 {
                return total;
            }
            total.claimed += report.claimed;
            total.dispatched += report.dispatched;
            total.retried += report.retried;
            total.dead_lettered += report.dead_lettered;
            total.unrecorded += report.unrecorded;
        }
    }

    /// Dispatches everything and polls every subscription until nothing due
    /// is left anywhere.
    pub async fn settle(&self) -> DispatchReport {
        let mut total = DispatchReport::default();
        loop {
            let report = self.drain_outbox().await;
            let mut delivered = 0;
            for subscription in [SEARCH_SUBSCRIPTION, OBSERVER_SUBSCRIPTION] {
                delivered += self.bus.poll(subscription).await.unwrap().claimed;
            }
            total.claimed += report.claimed;
            total.dispatched += report.dispatched;
            total.retried += report.retried;
            total.dead_lettered += report.dead_lettered;
            total.unrecorded += report.unrecorded;
            if report.claimed == 0 && delivered == 0 {
                return total;
            }
        }
    }
}

/// A create request body for a vehicle of `make`.
pub fn auction_body(make: &str) -> serde_json::Value {
    serde_json::json!({
        "make": make,
        "model": "Mustang",
        "year": 2021,
        "color": "Red",
        "mileage": 12_000,
        "reserve_price": 25_000,
        "auction_end": "2026-02-01T00:00:00Z",
    })
}

/// Send a request with an optional identity and JSON body; return status and JSON.
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<&serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(AUTHENTICATED_USER_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(serde_json::Value::Null);

    (status, json)
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None, None).await
}
