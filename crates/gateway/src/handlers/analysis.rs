//! Analysis handlers: upload, follow-up questions, retry and cancel

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use clinicheck_common::errors::{AppError, Result};
use clinicheck_common::models::{AnalysisResult, AnalysisStatus, SubjectContext};
use clinicheck_ingestion::SourceDocument;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::state::AppState;

/// Multipart field carrying the subject context
const SUBJECT_FIELD: &str = "subject";

/// Follow-up question request
#[derive(Debug, Deserialize, Validate)]
pub struct AskRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,
}

/// Analysis response: the result plus what to show the user when there is no answer
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    #[serde(flatten)]
    pub result: AnalysisResult,

    pub retryable: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

impl From<AnalysisResult> for AnalysisResponse {
    fn from(result: AnalysisResult) -> Self {
        Self {
            retryable: result.is_retryable(),
            message: result.user_message(),
            result,
        }
    }
}

fn respond(result: AnalysisResult) -> (StatusCode, Json<AnalysisResponse>) {
    let status = match result.status {
        AnalysisStatus::Completed | AnalysisStatus::NothingToAnalyze => StatusCode::OK,
        AnalysisStatus::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AnalysisStatus::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisStatus::Cancelled => StatusCode::CONFLICT,
    };
    (status, Json(result.into()))
}

/// Analyze uploaded files (multipart: one or more file fields, optional `subject`)
pub async fn analyze(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<AnalysisResponse>)> {
    let entry = state.sessions.get(session_id).await?;
    let (files, subject) = read_upload(multipart, state.config.server.max_upload_bytes).await?;

    tracing::info!(
        session_id = %session_id,
        files = files.len(),
        has_subject = subject.is_some(),
        "Analysis requested"
    );

    let mut session = entry.session.lock().await;
    let inflight = entry.start_request();
    let result = state
        .analyzer
        .analyze(&mut session, files, subject, &inflight.token)
        .await?;

    Ok(respond(result))
}

/// Answer a follow-up question against the session's evidence
pub async fn ask(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<AskRequest>,
) -> Result<(StatusCode, Json<AnalysisResponse>)> {
    request
        .validate()
        .map_err(|e| AppError::invalid_input(e.to_string()))?;

    let entry = state.sessions.get(session_id).await?;
    let mut session = entry.session.lock().await;
    let inflight = entry.start_request();
    let result = state
        .analyzer
        .ask(&mut session, &request.question, None, &inflight.token)
        .await?;

    Ok(respond(result))
}

/// Resume the session's failed request
pub async fn retry(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<(StatusCode, Json<AnalysisResponse>)> {
    let entry = state.sessions.get(session_id).await?;
    let mut session = entry.session.lock().await;
    let inflight = entry.start_request();
    let result = state.analyzer.retry(&mut session, &inflight.token).await?;

    Ok(respond(result))
}

/// Cancel the in-flight request without waiting for it
pub async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CancelResponse>> {
    let entry = state.sessions.get(session_id).await?;
    let cancelled = entry.cancel();

    tracing::info!(session_id = %session_id, cancelled, "Cancel requested");
    Ok(Json(CancelResponse { cancelled }))
}

/// Collect the uploaded files and the optional subject context
async fn read_upload(
    mut multipart: Multipart,
    limit: usize,
) -> Result<(Vec<SourceDocument>, Option<SubjectContext>)> {
    let mut files = Vec::new();
    let mut subject = None;
    let mut received = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e, received, limit))?
    {
        if field.name() == Some(SUBJECT_FIELD) {
            let value = field
                .text()
                .await
                .map_err(|e| upload_error(e, received, limit))?;
            subject = SubjectContext::from_field(&value);
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let declared_mime = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| upload_error(e, received, limit))?;
        received += bytes.len();

        files.push(SourceDocument {
            source_id: file_name,
            bytes,
            declared_mime,
        });
    }

    Ok((files, subject))
}

fn upload_error(error: MultipartError, received: usize, limit: usize) -> AppError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge {
            size: received.max(limit + 1),
            limit,
        }
    } else {
        AppError::invalid_input(format!("Malformed upload: {}", error.body_text()))
    }
}
