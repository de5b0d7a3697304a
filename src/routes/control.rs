use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::post,
    Json, Router,
};
use tracing::info;

use crate::mission::MissionStatus;
use crate::models::{AppState, MissionCreatedResponse};
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/control/{mission_id}/pause", post(pause_mission))
        .route("/api/control/{mission_id}/resume", post(resume_mission))
        .route("/api/control/{mission_id}/retry", post(retry_mission))
        .with_state(state)
}

async fn pause_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<MissionStatus>> {
    info!(mission_id = %mission_id, "Pause requested over HTTP");
    Ok(Json(state.engine.pause(&mission_id).await?))
}

async fn resume_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<MissionStatus>> {
    info!(mission_id = %mission_id, "Resume requested over HTTP");
    Ok(Json(state.engine.resume(&mission_id).await?))
}

/// Failed missions only; the retry runs as a new mission.
async fn retry_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<(StatusCode, ResponseJson<MissionCreatedResponse>)> {
    info!(mission_id = %mission_id, "Retry requested over HTTP");
    let status = state.engine.retry(&mission_id).await?;
    let response = MissionCreatedResponse::new(status, format!("Retry of mission {}", mission_id));
    Ok((StatusCode::CREATED, Json(response)))
}
