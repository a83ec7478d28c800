//! Session management handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use clinicheck_common::errors::Result;
use clinicheck_common::models::ConversationTurn;
use clinicheck_context::{Session, SessionState};
use serde::Serialize;
use uuid::Uuid;

use crate::state::AppState;

/// Create session response
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Session snapshot response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<ConversationTurn>,
    /// Number of evidence units kept from the last analysis
    pub evidence_units: usize,
}

impl SessionResponse {
    fn from_session(session: &Session) -> Self {
        Self {
            session_id: session.id(),
            state: session.state(),
            created_at: session.created_at(),
            turns: session.history().to_vec(),
            evidence_units: session.last_bundle().map_or(0, |b| b.len()),
        }
    }
}

/// Create a new session
pub async fn create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<CreateSessionResponse>) {
    let entry = state.new_session().await;
    let created_at = entry.session.lock().await.created_at();
    let sessions = state.sessions.len().await;

    tracing::info!(
        session_id = %entry.id,
        sessions,
        "Session created"
    );

    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: entry.id,
            created_at,
        }),
    )
}

/// Get the conversation history and state of a session
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let entry = state.sessions.get(session_id).await?;
    let session = entry.session.lock().await;
    Ok(Json(SessionResponse::from_session(&session)))
}

/// Drop a session, cancelling anything in flight
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.sessions.remove(session_id).await?;
    tracing::info!(session_id = %session_id, "Session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Clear history, evidence and any pending request
pub async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionResponse>> {
    let entry = state.sessions.get(session_id).await?;
    entry.cancel();
    let mut session = entry.session.lock().await;
    session.reset();

    tracing::info!(session_id = %session_id, "Session reset");
    Ok(Json(SessionResponse::from_session(&session)))
}
