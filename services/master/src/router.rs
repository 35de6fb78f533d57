//! Axum Router Configuration
//!
//! The service exposes exactly two endpoints: the interview WebSocket and a
//! liveness probe.

use crate::{gateway::ws_handler, state::AppState};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .with_state(app_state)
}

async fn healthz() -> &'static str {
    "ok"
}
