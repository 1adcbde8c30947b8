use std::collections::HashSet;

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::{PipelineError, PipelineResult},
    features::normalize_watched_id,
    models::RecommendResponse,
    recommend::recommend,
};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub user_id: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    10
}

/// Liveness probe
pub async fn status() -> Json<Value> {
    Json(json!({ "status": "online" }))
}

/// Aggregate impression and view totals from the relational store
pub async fn video_stats(State(state): State<AppState>) -> PipelineResult<Json<Value>> {
    let (impressions, views) = state.orchestrator.aggregates().totals().await?;
    Ok(Json(json!({ "impressions": impressions, "views": views })))
}

/// Runs a fetch cycle immediately, then retrains over the extended corpus
pub async fn force_fetch(State(state): State<AppState>) -> PipelineResult<Json<Value>> {
    let added = state.orchestrator.fetch_cycle().await?;
    state.orchestrator.train_cycle().await?;
    Ok(Json(json!({
        "message": "fetch and retrain complete",
        "records_added": added
    })))
}

/// Runs a write-back cycle immediately
pub async fn force_write(State(state): State<AppState>) -> PipelineResult<Json<Value>> {
    let users = state.orchestrator.write_back_cycle().await?;
    Ok(Json(json!({
        "message": "write-back complete",
        "users_written": users
    })))
}

/// Flips the shutdown flag watched by the scheduler, the backfill sweep, and
/// the server's graceful-shutdown future.
pub async fn shutdown(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    tracing::info!("Shutdown requested over HTTP");
    let _ = state.shutdown_tx.send(true);
    (StatusCode::OK, Json(json!({ "message": "shutting down" })))
}

/// On-demand scoring: rank the user's unwatched videos and append the result
/// to their discover bucket.
pub async fn recommend_for_user(
    State(state): State<AppState>,
    Json(request): Json<RecommendRequest>,
) -> PipelineResult<Json<RecommendResponse>> {
    if request.user_id.is_empty() {
        return Err(PipelineError::InvalidInput("user_id is required".to_string()));
    }

    let model = state
        .orchestrator
        .current_model()
        .await
        .ok_or(PipelineError::ModelUnavailable)?;

    let store = state.orchestrator.store();
    let watched: HashSet<String> = store
        .watched_views(&request.user_id)
        .await?
        .iter()
        .map(|id| normalize_watched_id(id))
        .collect();

    let candidates: Vec<String> = store
        .list_video_ids()
        .await?
        .into_iter()
        .filter(|id| !watched.contains(id))
        .collect();
    if candidates.is_empty() {
        return Err(PipelineError::InvalidInput(
            "no unwatched candidate videos for user".to_string(),
        ));
    }

    let recommendations = recommend(&request.user_id, &model, &candidates, request.top_k);

    store.ensure_discover_bucket(&request.user_id).await?;
    store
        .union_discover_bucket(&request.user_id, recommendations.clone())
        .await?;

    tracing::info!(
        user_id = %request.user_id,
        count = recommendations.len(),
        "Served on-demand recommendations"
    );

    Ok(Json(RecommendResponse {
        message: "success".to_string(),
        recommendations,
    }))
}
