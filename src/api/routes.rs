use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(handlers::status))
        .route("/video_stats", get(handlers::video_stats))
        // Pipeline triggers
        .route("/force_fetch", post(handlers::force_fetch))
        .route("/force_write", post(handlers::force_write))
        .route("/shutdown", post(handlers::shutdown))
        // Scoring
        .route("/recommend", post(handlers::recommend_for_user))
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
