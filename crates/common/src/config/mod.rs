//! Configuration management for CliniCheck services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values
//!
//! The reasoner credential additionally falls back to `GOOGLE_API_KEY`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{AppError, Result};
use crate::models::TemplateKind;

/// Environment variable consulted when `reasoner.api_key` is not configured
pub const CREDENTIAL_ENV_VAR: &str = "GOOGLE_API_KEY";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Reasoner (LLM) configuration
    #[serde(default)]
    pub reasoner: ReasonerConfig,

    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds (whole HTTP request, all reasoner turns included)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum accepted upload body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Live sessions kept before the least recently used is evicted
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle seconds before a session expires (0 disables expiry)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReasonerConfig {
    /// Reasoner provider: gemini, mock
    #[serde(default = "default_reasoner_provider")]
    pub provider: String,

    /// API key for the reasoner service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model used for text prompts
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Model used for image prompts
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Per round trip timeout in seconds
    #[serde(default = "default_reasoner_timeout")]
    pub timeout_secs: u64,

    /// Automatic retries for unavailable reasoner (0 disables)
    #[serde(default = "default_reasoner_retries")]
    pub max_retries: u32,

    /// Initial backoff between automatic retries in milliseconds
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

/// How chunk boundaries are chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPolicy {
    /// Cut at exactly `max_chunk_length` characters
    Fixed,
    /// Prefer paragraph/sentence breaks inside the look-back window
    #[default]
    Boundary,
    /// Semantic levels via text-splitter (whitespace between chunks may be trimmed)
    Semantic,
}

/// How multiple text-bearing sources are merged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Every source contributes, in arrival order
    #[default]
    Concatenate,
    /// Only the last document source contributes; image sources always accumulate
    Replace,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Maximum characters per chunk
    #[serde(default = "default_max_chunk_length")]
    pub max_chunk_length: usize,

    /// Look-back window (characters) for boundary-aware splitting
    #[serde(default = "default_lookback_window")]
    pub lookback_window: usize,

    #[serde(default)]
    pub chunk_policy: ChunkPolicy,

    #[serde(default)]
    pub aggregation_policy: AggregationPolicy,

    /// Include the subject context (gender or other tag) in prompts
    #[serde(default = "default_true")]
    pub include_subject_context: bool,

    /// Refuse to analyze without a subject context when it is included
    #[serde(default)]
    pub require_subject_context: bool,

    /// Stream reasoner responses instead of batching
    #[serde(default)]
    pub streaming: bool,

    /// Template used for uploads
    #[serde(default)]
    pub template_kind: TemplateKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 300 }
fn default_max_upload_bytes() -> usize { 25 * 1024 * 1024 }
fn default_max_sessions() -> usize { 10_000 }
fn default_session_ttl() -> u64 { 3600 }
fn default_reasoner_provider() -> String { "gemini".to_string() }
fn default_text_model() -> String { crate::DEFAULT_TEXT_MODEL.to_string() }
fn default_vision_model() -> String { "gemini-1.5-flash".to_string() }
fn default_reasoner_timeout() -> u64 { 60 }
fn default_reasoner_retries() -> u32 { 2 }
fn default_retry_backoff() -> u64 { 500 }
fn default_temperature() -> f32 { 0.2 }
fn default_max_chunk_length() -> usize { crate::DEFAULT_MAX_CHUNK_LENGTH }
fn default_lookback_window() -> usize { 200 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "clinicheck".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            provider: default_reasoner_provider(),
            api_key: None,
            api_base: None,
            text_model: default_text_model(),
            vision_model: default_vision_model(),
            timeout_secs: default_reasoner_timeout(),
            max_retries: default_reasoner_retries(),
            retry_backoff_ms: default_retry_backoff(),
            temperature: default_temperature(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: default_max_chunk_length(),
            lookback_window: default_lookback_window(),
            chunk_policy: ChunkPolicy::default(),
            aggregation_policy: AggregationPolicy::default(),
            include_subject_context: true,
            require_subject_context: false,
            streaming: false,
            template_kind: TemplateKind::default(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PIPELINE__MAX_CHUNK_LENGTH=2000
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_credential_fallback(std::env::var(CREDENTIAL_ENV_VAR).ok());
        Ok(config)
    }

    /// Use `fallback` as the reasoner credential when none is configured
    pub fn apply_credential_fallback(&mut self, fallback: Option<String>) {
        let configured = self
            .reasoner
            .api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty());

        if !configured {
            self.reasoner.api_key = fallback.filter(|key| !key.trim().is_empty());
        }
    }

    /// Check settings that must hold before any pipeline component is built.
    ///
    /// A missing credential for a remote provider is fatal here rather than
    /// surfacing on the first reasoner call.
    pub fn validate(&self) -> Result<()> {
        if self.reasoner.provider != "mock" && self.reasoner.api_key.is_none() {
            return Err(AppError::configuration(format!(
                "API key is not set for reasoner provider '{}'. Set {} or APP__REASONER__API_KEY",
                self.reasoner.provider, CREDENTIAL_ENV_VAR
            )));
        }

        if self.pipeline.max_chunk_length == 0 {
            return Err(AppError::configuration("pipeline.max_chunk_length must be positive"));
        }

        if self.pipeline.lookback_window >= self.pipeline.max_chunk_length {
            return Err(AppError::configuration(
                "pipeline.lookback_window must be smaller than pipeline.max_chunk_length",
            ));
        }

        if self.reasoner.timeout_secs == 0 {
            return Err(AppError::configuration("reasoner.timeout_secs must be positive"));
        }

        if self.server.max_sessions == 0 {
            return Err(AppError::configuration("server.max_sessions must be positive"));
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Idle session lifetime, `None` when expiry is disabled
    pub fn session_ttl(&self) -> Option<Duration> {
        (self.server.session_ttl_secs > 0).then(|| Duration::from_secs(self.server.session_ttl_secs))
    }

    /// Get reasoner round trip timeout as Duration
    pub fn reasoner_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoner.timeout_secs)
    }
}
