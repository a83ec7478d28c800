//! Analysis requests and results

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EvidenceBundle, SubjectContext};

/// Input for one analysis; constructed fresh per user action
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub subject_context: Option<SubjectContext>,
    pub evidence_bundle: EvidenceBundle,
    pub user_question: Option<String>,
}

/// A source that could not be extracted, recorded instead of aborting the request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExtractionFailure {
    pub source_id: String,
    pub message: String,
}

/// Outcome of an analysis request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Completed,
    /// The evidence produced zero chunks; the reasoner was not called
    NothingToAnalyze,
    /// Content-safety refusal from the reasoner
    Rejected { reason: String },
    /// Network, timeout or quota failure
    Unavailable { message: String },
    Cancelled,
}

/// Final artifact handed to the caller
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AnalysisResult {
    pub request_id: Uuid,

    /// Per-chunk answers joined in chunk order
    pub text: String,

    pub per_chunk_results: Vec<String>,

    pub status: AnalysisStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extraction_errors: Vec<ExtractionFailure>,
}

impl AnalysisResult {
    /// Placeholder result for a request that did not complete
    pub fn placeholder(request_id: Uuid, status: AnalysisStatus) -> Self {
        Self {
            request_id,
            text: String::new(),
            per_chunk_results: Vec::new(),
            status,
            extraction_errors: Vec::new(),
        }
    }

    pub fn with_extraction_errors(mut self, errors: Vec<ExtractionFailure>) -> Self {
        self.extraction_errors = errors;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == AnalysisStatus::Completed
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status, AnalysisStatus::Rejected { .. })
    }

    /// Rejected and unavailable requests can be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.status,
            AnalysisStatus::Rejected { .. } | AnalysisStatus::Unavailable { .. }
        )
    }

    /// Text to show in place of an answer that is missing
    pub fn user_message(&self) -> Option<&'static str> {
        match self.status {
            AnalysisStatus::Completed => None,
            AnalysisStatus::NothingToAnalyze => {
                Some("No readable content was found in the uploaded files.")
            }
            AnalysisStatus::Rejected { .. } => Some(
                "The analysis service declined to answer this request. Rephrase it and try again.",
            ),
            AnalysisStatus::Unavailable { .. } => {
                Some("The analysis service is currently unavailable. Please try again shortly.")
            }
            AnalysisStatus::Cancelled => Some("The request was cancelled."),
        }
    }
}
