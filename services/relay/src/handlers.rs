//! Axum Handlers for the Health/Status Surface
//!
//! Plain synchronous request/response: process liveness and the current
//! open-session count. No side effects, no authentication.

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::sync::Arc;

/// `GET /` — full status report.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Voice session relay is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "port": state.config.bind_address.port(),
        "uptime": state.uptime_seconds(),
        "connections": state.open_sessions(),
    }))
}

/// `GET /health` — minimal liveness token for load balancers.
pub async fn health() -> &'static str {
    "OK"
}

/// Fallback for unknown paths.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
