pub mod control;
pub mod media;
pub mod status;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::infra::app_state::AppState;

/// Builds the full router for the demo binary: the cache-scheme range
/// server, the status surface, and the control endpoint.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/cache/{*key}", get(media::serve_cached))
        .route("/status", get(status::get_status))
        .route("/control", post(control::post_control))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
