//! Domain model shared by the ingestion and context crates

mod analysis;
mod chunk;
mod conversation;
mod evidence;

pub use analysis::{AnalysisRequest, AnalysisResult, AnalysisStatus, ExtractionFailure};
pub use chunk::{Chunk, ChunkSection};
pub use conversation::{ConversationTurn, Role};
pub use evidence::{EvidenceBundle, EvidenceUnit, Modality, SourceRef};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction template selected for a reasoning request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Structured clinical analysis of uploaded reports
    #[default]
    InitialAnalysis,
    /// Follow-up question answered against prior evidence
    ContextualQuestion,
    /// Clinical analysis of image-derived evidence
    ImageAnalysis,
    /// Structured review of a research paper
    ResearchPaper,
}

/// Whether reasoner answers arrive in one piece or as fragments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Batched,
    Streaming,
}

/// Self-reported gender of the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    NonBinary,
    PreferNotToSay,
}

impl Gender {
    /// Parse the labels offered by upload forms ("Male", "non-binary", ...).
    ///
    /// "Select" and empty strings mean no choice was made.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "male" | "m" => Some(Gender::Male),
            "female" | "f" => Some(Gender::Female),
            "non binary" | "nonbinary" => Some(Gender::NonBinary),
            "prefer not to say" => Some(Gender::PreferNotToSay),
            _ => None,
        }
    }
}

/// Demographic context attached to an analysis request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectContext {
    Gender(Gender),
    /// Any other demographic descriptor, e.g. "65 year old"
    Tag(String),
}

impl SubjectContext {
    /// Build from a free-form form field value.
    pub fn from_field(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("select") {
            return None;
        }
        Some(
            Gender::from_label(trimmed)
                .map(SubjectContext::Gender)
                .unwrap_or_else(|| SubjectContext::Tag(trimmed.to_string())),
        )
    }
}

impl fmt::Display for SubjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectContext::Gender(Gender::Male) => write!(f, "male"),
            SubjectContext::Gender(Gender::Female) => write!(f, "female"),
            SubjectContext::Gender(Gender::NonBinary) => write!(f, "non-binary"),
            SubjectContext::Gender(Gender::PreferNotToSay) => write!(f, "gender not disclosed"),
            SubjectContext::Tag(tag) => write!(f, "{}", tag),
        }
    }
}
