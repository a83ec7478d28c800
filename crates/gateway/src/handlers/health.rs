//! Health check handlers

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub reasoner: String,
    pub sessions: usize,
}

/// Liveness check, healthy whenever the server is running
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: clinicheck_common::VERSION.to_string(),
        reasoner: state.reasoner.name().to_string(),
        sessions: state.sessions.len().await,
    })
}
