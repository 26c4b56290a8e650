use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{
    backend::GenerationBackend,
    cache::ResponseCache,
    error::BridgeError,
    model::GenerationResponse,
    stats::{BridgeStats, StatsReporter},
};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ResponseCache>,
    pub stats: StatsReporter,
    pub backend: Arc<dyn GenerationBackend>,
}

#[derive(Serialize)]
struct ModelsResponse {
    available: bool,
    models: Vec<String>,
}

pub fn build_router(
    cache: Arc<ResponseCache>,
    stats: StatsReporter,
    backend: Arc<dyn GenerationBackend>,
) -> Router {
    let state = AppState {
        cache,
        stats,
        backend,
    };

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats_snapshot))
        .route("/models", get(models))
        .route("/responses/:id", get(cached_response))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

async fn stats_snapshot(State(state): State<AppState>) -> Json<BridgeStats> {
    Json(state.stats.snapshot())
}

async fn models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state.backend.list_models().await;
    let available = !models.is_empty() || state.backend.is_available().await;
    Json(ModelsResponse { available, models })
}

async fn cached_response(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GenerationResponse>, BridgeError> {
    state
        .cache
        .get(&id)
        .map(Json)
        .ok_or_else(|| BridgeError::NotFound(format!("no cached response for '{id}'")))
}
