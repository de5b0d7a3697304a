//! API Routes
//!
//! This module organizes all HTTP endpoints for the engine:
//! - `/api/research` - Create, list, inspect and cancel missions
//! - `/api/control` - Pause, resume and retry
//! - `/api/status` - Status snapshot, SSE event stream and event history
//! - `/api/findings` - Findings with filters, one finding, and a summary
//! - `/api/export` - Request and list exports, download written files
//! - `/api/health` - Health checks

pub mod control;
pub mod export;
pub mod findings;
pub mod health;
pub mod research;
pub mod status;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(research::router(state.clone()))
        .merge(control::router(state.clone()))
        .merge(status::router(state.clone()))
        .merge(findings::router(state.clone()))
        .merge(export::router(state.clone()))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
