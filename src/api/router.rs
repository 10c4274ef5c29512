//! HTTP router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::ApiContext;

/// Build the API router: `GET /health`, `POST /map`.
///
/// Requests are traced through `tower_http`, so they land in the same
/// `tracing` subscriber as the pipeline spans.
pub fn api_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/map", post(endpoints::map::map))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
