use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
    response::Json as ResponseJson,
    routing::get,
    Json, Router,
};
use futures::{Stream, StreamExt};
use tracing::{info, warn};

use crate::events::MissionEvent;
use crate::mission::MissionStatus;
use crate::models::{AppState, EventsQuery};
use crate::types::AppResult;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 1000;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status/{mission_id}", get(get_status))
        .route("/api/status/{mission_id}/stream", get(stream_events))
        .route("/api/status/{mission_id}/events", get(event_history))
        .with_state(state)
}

async fn get_status(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
) -> AppResult<ResponseJson<MissionStatus>> {
    Ok(Json(state.engine.status(&mission_id).await?))
}

/// Resume point: `?from=` wins, otherwise the event after `Last-Event-ID`.
fn resume_from(query: &EventsQuery, headers: &HeaderMap) -> u64 {
    query
        .from
        .or_else(|| {
            headers
                .get("last-event-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|seq| seq.saturating_add(1))
        })
        .unwrap_or(1)
        .max(1)
}

fn to_sse(event: MissionEvent) -> Event {
    let sse = Event::default()
        .event(event.kind.as_str())
        .id(event.seq.to_string());
    match sse.json_data(&event) {
        Ok(sse) => sse,
        Err(err) => {
            warn!(
                mission_id = %event.mission_id,
                seq = event.seq,
                error = %err,
                "Event did not serialize"
            );
            Event::default().event(event.kind.as_str()).id(event.seq.to_string())
        }
    }
}

async fn stream_events(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let from = resume_from(&query, &headers);
    info!(mission_id = %mission_id, from, "Event stream opened");

    let subscription = state.engine.subscribe(&mission_id, from).await?;
    let stream = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse(event)));

    Ok(Sse::new(stream))
}

async fn event_history(
    State(state): State<AppState>,
    Path(mission_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> AppResult<ResponseJson<Vec<MissionEvent>>> {
    let from = query.from.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.engine.history(&mission_id, from, limit).await?))
}
