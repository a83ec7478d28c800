//! Reasoner capability abstraction
//!
//! The reasoner is the external LLM service that turns prompts into answers.
//! Providers:
//! - Gemini (REST, batched and SSE streaming, inline image data)
//! - Mock (scripted replies for tests and local development)

mod gemini;
mod mock;

pub use gemini::GeminiReasoner;
pub use mock::{MockReasoner, MockReply, MockRequest, MockRequestKind};

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ReasonerConfig;
use crate::errors::{AppError, Result};
use crate::models::ConversationTurn;

/// Lazy, finite, non-restartable sequence of answer fragments
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = std::result::Result<String, ReasonerError>> + Send + 'static>>;

/// Failure kinds of a reasoner round trip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReasonerError {
    /// Content-safety refusal
    #[error("request rejected: {reason}")]
    Rejected { reason: String },

    /// Network, timeout, quota or provider fault
    #[error("reasoner unavailable: {message}")]
    Unavailable { message: String },

    #[error("request cancelled")]
    Cancelled,
}

impl ReasonerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ReasonerError::Rejected { reason: reason.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        ReasonerError::Unavailable { message: message.into() }
    }

    /// Label used for logs and metrics; rejections and faults never share one
    pub fn outcome_label(&self) -> &'static str {
        match self {
            ReasonerError::Rejected { .. } => "rejected",
            ReasonerError::Unavailable { .. } => "unavailable",
            ReasonerError::Cancelled => "cancelled",
        }
    }
}

/// Trait for the external reasoning service
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Answer `prompt` given the ordered conversation `history`
    async fn generate_text(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
    ) -> std::result::Result<String, ReasonerError>;

    /// Answer `prompt` about an image
    async fn generate_from_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> std::result::Result<String, ReasonerError>;

    /// Answer `prompt` as a stream of fragments
    async fn generate_stream(
        &self,
        history: &[ConversationTurn],
        prompt: &str,
    ) -> std::result::Result<FragmentStream, ReasonerError>;

    /// Get the provider name
    fn name(&self) -> &str;
}

/// Create a reasoner based on configuration
pub fn create_reasoner(config: &ReasonerConfig) -> Result<Arc<dyn Reasoner>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiReasoner::new(config)?)),
        "mock" => {
            tracing::warn!("Using mock reasoner, answers are synthetic");
            Ok(Arc::new(MockReasoner::echo()))
        }
        other => Err(AppError::configuration(format!(
            "Unknown reasoner provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels_are_distinct() {
        assert_ne!(
            ReasonerError::rejected("SAFETY").outcome_label(),
            ReasonerError::unavailable("timeout").outcome_label()
        );
    }

    #[test]
    fn test_create_mock_reasoner() {
        let config = ReasonerConfig {
            provider: "mock".to_string(),
            ..ReasonerConfig::default()
        };
        let reasoner = create_reasoner(&config).unwrap();
        assert_eq!(reasoner.name(), "mock");
    }

    #[test]
    fn test_unknown_provider_is_configuration_error() {
        let config = ReasonerConfig {
            provider: "oracle".to_string(),
            ..ReasonerConfig::default()
        };
        assert!(matches!(
            create_reasoner(&config),
            Err(AppError::Configuration { .. })
        ));
    }

    #[test]
    fn test_gemini_without_key_is_configuration_error() {
        let config = ReasonerConfig::default();
        assert!(matches!(
            create_reasoner(&config),
            Err(AppError::Configuration { .. })
        ));
    }
}
