//! CliniCheck Common Library
//!
//! Shared code for all CliniCheck crates including:
//! - Domain model (evidence, chunks, conversation turns, analysis results)
//! - Reasoner capability abstraction (Gemini client and scripted mock)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod config;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod reasoner;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use reasoner::{Reasoner, ReasonerError};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default maximum chunk length in characters
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 1000;

/// Default reasoner model for text prompts
pub const DEFAULT_TEXT_MODEL: &str = "gemini-1.5-flash";
