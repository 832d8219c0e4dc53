use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::config::TunablesPatch;
use crate::gate::{PostOutcome, Trigger};
use crate::scheduler::AutoPoster;

const DEFAULT_POOL_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    poster: Arc<AutoPoster>,
}

/// Status, listing and admin routes over a shared poster.
pub fn router(poster: Arc<AutoPoster>) -> Router {
    let state = AppState { poster };

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .route("/candidates", get(candidates))
        .route("/pool", get(pool))
        .route("/items/{id}", get(item_state))
        .route("/admin/discover", post(admin_discover))
        .route("/admin/post", post(admin_post))
        .route("/admin/candidates/{id}/reject", post(admin_reject))
        .route("/admin/reset-daily", post(admin_reset_daily))
        .route("/admin/tunables", patch(admin_tunables))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn status(State(state): State<AppState>) -> Response {
    Json(state.poster.status(Utc::now()).await).into_response()
}

async fn candidates(State(state): State<AppState>) -> Response {
    Json(state.poster.candidates().await).into_response()
}

#[derive(Deserialize)]
struct PoolQuery {
    limit: Option<usize>,
}

async fn pool(State(state): State<AppState>, Query(q): Query<PoolQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_POOL_LIMIT);
    Json(state.poster.pool(limit).await).into_response()
}

async fn admin_discover(State(state): State<AppState>) -> Response {
    Json(state.poster.discover(Utc::now()).await).into_response()
}

#[derive(Deserialize)]
struct PostQuery {
    #[serde(default)]
    force: bool,
}

async fn admin_post(State(state): State<AppState>, Query(q): Query<PostQuery>) -> Response {
    let outcome = state
        .poster
        .post_next(Trigger::Manual, q.force, Utc::now())
        .await;
    let code = match outcome {
        PostOutcome::Posted { .. } => StatusCode::OK,
        PostOutcome::Blocked(_) => StatusCode::CONFLICT,
        PostOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
    };
    (code, Json(outcome)).into_response()
}

async fn item_state(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let lifecycle = state.poster.lifecycle(&id).await;
    Json(json!({ "id": id, "state": lifecycle })).into_response()
}

async fn admin_reject(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.poster.reject_candidate(&id, Utc::now()).await {
        Ok(()) => Json(json!({ "rejected": id })).into_response(),
        Err(lifecycle) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("'{id}' is not a candidate or pooled item"),
                "state": lifecycle,
            })),
        )
            .into_response(),
    }
}

async fn admin_reset_daily(State(state): State<AppState>) -> Response {
    let now = Utc::now();
    state.poster.reset_daily(now).await;
    Json(state.poster.status(now).await).into_response()
}

async fn admin_tunables(
    State(state): State<AppState>,
    Json(patch): Json<TunablesPatch>,
) -> Response {
    match state.poster.update_tunables(&patch, Utc::now()).await {
        Ok(t) => Json(t).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
