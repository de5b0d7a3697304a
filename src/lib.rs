// Chronicle - mission orchestration engine for long-running market research

pub mod agents;
pub mod config;
pub mod events;
pub mod export;
pub mod findings;
pub mod llm;
pub mod middleware;
pub mod mission;
pub mod models;
pub mod routes;
pub mod scoring;
pub mod storage;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use mission::MissionEngine;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
