//! Health and status handlers

use super::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use defaults_types::LeadershipStatus;
use serde::Serialize;

/// Liveness probe; always 200
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Daemon status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime: String,
    pub started_at: DateTime<Utc>,
    pub identity: String,
    pub leadership: LeadershipStatus,
    pub defaults: Vec<String>,
}

/// Daemon status endpoint
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: state.version.clone(),
        uptime: state.uptime(),
        started_at: state.started_at,
        identity: state.identity.clone(),
        leadership: state.leadership.borrow().clone(),
        defaults: state.defaults.as_ref().clone(),
    })
}
