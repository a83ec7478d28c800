//! CliniCheck Context Engine
//!
//! Turns evidence into answers:
//! - Prompt composition per template kind
//! - Reasoning sessions with an append-only turn log
//! - Response collection
//! - The analysis pipeline tying ingestion and reasoning together

pub mod collector;
pub mod pipeline;
pub mod prompt;
pub mod session;

pub use collector::{collect, record};
pub use pipeline::{AnalysisMode, Analyzer, Session};
pub use prompt::{compose, PromptInput, IMAGE_DESCRIPTION_DIRECTIVE};
pub use session::{ReasoningSession, SessionState};
