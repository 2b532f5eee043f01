//! Auctionhouse API: HTTP command surface over the Auction and Search
//! contexts.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Builds the full router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with the front end's origin once it is deployed.
    Router::new()
        .merge(routes::health::router())
        .merge(routes::auctions::router())
        .merge(routes::search::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
