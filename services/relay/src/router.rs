//! Axum Router Configuration
//!
//! Wires up the status surface and the browser-facing WebSocket endpoint.
//! A matched path with the wrong method yields 405; unknown paths fall back
//! to a plain-text 404. The permissive CORS policy (including the OPTIONS
//! preflight) is layered on in the binary.

use crate::{handlers, state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the main Axum router for the relay.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::status))
        .route("/health", get(handlers::health))
        .route("/ws", get(ws_handler))
        .fallback(handlers::not_found)
        .with_state(app_state)
}
