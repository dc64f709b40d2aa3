//! Worker listing endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use longday_core::worker::{WorkerId, WorkerState};
use worker_host::WorkerSummary;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersResponse {
    /// Live processes known to the host
    pub live: Vec<WorkerSummary>,
    /// Task states tracked by the manager, oldest first
    pub states: Vec<WorkerState>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

async fn list_workers(State(state): State<AppState>) -> Json<WorkersResponse> {
    Json(WorkersResponse {
        live: state.host().list().await,
        states: state.manager().states(),
    })
}

async fn get_worker(
    State(state): State<AppState>,
    Path(worker_id): Path<String>,
) -> Result<Json<WorkerState>, (StatusCode, Json<ErrorResponse>)> {
    let worker_id: WorkerId = worker_id.parse().map_err(|e: longday_core::Error| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;

    state.manager().get(worker_id).map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Worker not found: {}", worker_id),
            }),
        )
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/workers", get(list_workers))
        .route("/api/workers/{id}", get(get_worker))
}
