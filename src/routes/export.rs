use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tracing::{info, warn};

use crate::mission::parse_formats;
use crate::models::{AppState, ExportFile, ExportFilesResponse, ExportRequest, ExportResponse};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/export/{mission_id}", post(request_export).get(list_exports))
        .route("/api/export/{mission_id}/files", get(list_files))
        .route("/api/export/{mission_id}/download/{filename}", get(download_file))
        .with_state(state)
}

async fn request_export(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
    Json(request): Json<ExportRequest>,
) -> AppResult<ResponseJson<ExportResponse>> {
    let formats = if request.formats.is_empty() {
        None
    } else {
        Some(parse_formats(&request.formats)?)
    };
    info!(mission_id = %mission_id, formats = ?formats, "Export requested");

    let exports = state.engine.export(&mission_id, formats).await?;
    let total_findings = exports.first().map(|r| r.record_count).unwrap_or(0);

    Ok(Json(ExportResponse {
        mission_id,
        exports,
        total_findings,
        exported_at: Utc::now(),
    }))
}

async fn list_exports(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<ExportResponse>> {
    let exports = state.engine.exports(&mission_id).await?;
    let total_findings = state.engine.findings(&mission_id).await?.len();
    let exported_at = exports.last().map(|r| r.created_at).unwrap_or_else(Utc::now);

    Ok(Json(ExportResponse {
        mission_id,
        exports,
        total_findings,
        exported_at,
    }))
}

async fn list_files(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<ExportFilesResponse>> {
    let files: Vec<ExportFile> = state
        .engine
        .exports(&mission_id)
        .await?
        .iter()
        .filter_map(|record| {
            let filename = record.file_name()?.to_string();
            Some(ExportFile {
                export_id: record.id.clone(),
                format: record.format,
                download_url: format!("/api/export/{}/download/{}", mission_id, filename),
                filename,
                created_at: record.created_at,
            })
        })
        .collect();

    Ok(Json(ExportFilesResponse {
        mission_id,
        count: files.len(),
        files,
    }))
}

async fn download_file(
    State(state): State<AppState>,
    Path((mission_id, filename)): Path<(String, String)>,
) -> AppResult<Response> {
    let (record, path) = state.engine.export_file(&mission_id, &filename).await?;
    let body = tokio::fs::read(&path).await.map_err(|err| {
        warn!(
            mission_id = %mission_id,
            path = %path.display(),
            error = %err,
            "Export file unreadable"
        );
        AppError::NotFound(format!("Export file {} is no longer available", filename))
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, record.format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}
