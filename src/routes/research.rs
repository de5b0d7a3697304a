use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::mission::MissionStatus;
use crate::models::{
    AppState, CreateMissionRequest, MissionCreatedResponse, MissionListQuery, MissionListResponse,
};
use crate::types::AppResult;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/research", post(create_mission).get(list_missions))
        .route("/api/research/{mission_id}", get(get_mission).delete(cancel_mission))
        .with_state(state)
}

async fn create_mission(
    State(state): State<AppState>,
    Json(request): Json<CreateMissionRequest>,
) -> AppResult<(StatusCode, ResponseJson<MissionCreatedResponse>)> {
    info!(goal_len = request.goal.len(), "Received mission request");

    let status = state.engine.start_request(&request).await?;
    let response = MissionCreatedResponse::new(status, "Research mission started".to_string());

    Ok((StatusCode::CREATED, Json(response)))
}

/// Newest first, one page at a time.
async fn list_missions(
    State(state): State<AppState>,
    Query(query): Query<MissionListQuery>,
) -> ResponseJson<MissionListResponse> {
    let missions = state.engine.list().await;
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let total = missions.len();

    Json(MissionListResponse {
        missions: missions.into_iter().skip(offset).take(limit).collect(),
        total,
        limit,
        offset,
    })
}

async fn get_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<MissionStatus>> {
    Ok(Json(state.engine.status(&mission_id).await?))
}

async fn cancel_mission(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<MissionStatus>> {
    info!(mission_id = %mission_id, "Cancel requested over HTTP");
    Ok(Json(state.engine.cancel(&mission_id).await?))
}
