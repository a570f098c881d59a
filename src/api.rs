// src/api.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::ingest::{CycleReport, MemorySink};

#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<MemorySink>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ingest/last", get(last_all))
        .route("/ingest/last/{source}", get(last_one))
        .with_state(state)
}

async fn last_all(State(state): State<AppState>) -> Json<Vec<CycleReport>> {
    Json(state.sink.snapshot())
}

async fn last_one(
    State(state): State<AppState>,
    Path(source): Path<String>,
) -> Result<Json<CycleReport>, StatusCode> {
    state.sink.last(&source).map(Json).ok_or(StatusCode::NOT_FOUND)
}
