//! Error types for CliniCheck services
//!
//! Provides the error taxonomy shared by every crate:
//! - Distinct error types for configuration, input, extraction and reasoner failures
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reasoner::ReasonerError;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Input errors (1xxx)
    InvalidInput,
    PayloadTooLarge,

    // Extraction errors (2xxx)
    ExtractionError,

    // Reasoner errors (3xxx)
    ReasonerRejected,
    ReasonerUnavailable,
    Cancelled,

    // Resource errors (4xxx)
    SessionNotFound,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 1001,
            ErrorCode::PayloadTooLarge => 1002,

            ErrorCode::ExtractionError => 2001,

            ErrorCode::ReasonerRejected => 3001,
            ErrorCode::ReasonerUnavailable => 3002,
            ErrorCode::Cancelled => 3003,

            ErrorCode::SessionNotFound => 4001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing credential or invalid settings. Fatal: blocks all operations.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Extraction failed for {source_id}: {message}")]
    Extraction { source_id: String, message: String },

    /// Content-safety refusal from the reasoner.
    #[error("Reasoner rejected the request: {reason}")]
    ReasonerRejected { reason: String },

    /// Network, timeout, quota or provider fault.
    #[error("Reasoner unavailable: {message}")]
    ReasonerUnavailable { message: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::InvalidInput { .. } => ErrorCode::InvalidInput,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::Extraction { .. } => ErrorCode::ExtractionError,
            AppError::ReasonerRejected { .. } => ErrorCode::ReasonerRejected,
            AppError::ReasonerUnavailable { .. } => ErrorCode::ReasonerUnavailable,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,

            AppError::SessionNotFound { .. } => StatusCode::NOT_FOUND,

            AppError::Cancelled => StatusCode::CONFLICT,

            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            AppError::Extraction { .. } |
            AppError::ReasonerRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            AppError::Configuration { .. } |
            AppError::Internal { .. } |
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            AppError::ReasonerUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether the caller may retry the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::ReasonerRejected { .. } | AppError::ReasonerUnavailable { .. }
        )
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        AppError::InvalidInput { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        AppError::Configuration { message: message.into() }
    }
}

impl From<ReasonerError> for AppError {
    fn from(err: ReasonerError) -> Self {
        match err {
            ReasonerError::Rejected { reason } => AppError::ReasonerRejected { reason },
            ReasonerError::Unavailable { message } => AppError::ReasonerUnavailable { message },
            ReasonerError::Cancelled => AppError::Cancelled,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                retryable: self.is_retryable(),
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SessionNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::SessionNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_invalid_input_is_client_error() {
        let err = AppError::invalid_input("no file uploaded");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_reasoner_errors_stay_distinct() {
        let rejected: AppError = ReasonerError::Rejected { reason: "SAFETY".into() }.into();
        let unavailable: AppError = ReasonerError::Unavailable { message: "timeout".into() }.into();

        assert_eq!(rejected.code(), ErrorCode::ReasonerRejected);
        assert_eq!(unavailable.code(), ErrorCode::ReasonerUnavailable);
        assert_ne!(rejected.status_code(), unavailable.status_code());
        assert!(rejected.is_retryable());
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_configuration_error_is_fatal_server_error() {
        let err = AppError::configuration("GOOGLE_API_KEY is not set");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
        assert_eq!(err.code().as_code(), 9002);
    }
}
