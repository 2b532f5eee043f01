//! Routes for the Search bounded context.

use axum::extract::{Query, State};
use axum::{Json, Router, routing::get};
use tracing::instrument;

use auctionhouse_search::application::query_handlers::{self, SearchParams, SearchResult};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/search
#[instrument(skip(state))]
async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResult>, ApiError> {
    let result =
        query_handlers::search_items(&params, state.clock.now(), &*state.search_store).await?;
    Ok(Json(result))
}

/// Returns the router for the search context.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/search", get(search))
}
