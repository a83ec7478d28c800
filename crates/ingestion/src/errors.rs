//! Ingestion error types

use clinicheck_common::errors::AppError;
use clinicheck_common::ReasonerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Unsupported format for {source_id}: {detail}")]
    UnsupportedFormat { source_id: String, detail: String },

    #[error("PDF parse error for {source_id}: {message}")]
    PdfParse { source_id: String, message: String },

    #[error("Image description failed for {source_id}: {cause}")]
    ImageDescription {
        source_id: String,
        cause: ReasonerError,
    },

    #[error("Empty image description for {source_id}")]
    EmptyDescription { source_id: String },

    #[error("Decoder task failed for {source_id}: {message}")]
    TaskFailed { source_id: String, message: String },
}

impl IngestionError {
    /// Identifier of the source that failed
    pub fn source_id(&self) -> &str {
        match self {
            IngestionError::UnsupportedFormat { source_id, .. }
            | IngestionError::PdfParse { source_id, .. }
            | IngestionError::ImageDescription { source_id, .. }
            | IngestionError::EmptyDescription { source_id }
            | IngestionError::TaskFailed { source_id, .. } => source_id,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            IngestionError::UnsupportedFormat { .. } => "unsupported_format",
            IngestionError::PdfParse { .. } => "pdf_parse",
            IngestionError::ImageDescription { .. } | IngestionError::EmptyDescription { .. } => {
                "image_description"
            }
            IngestionError::TaskFailed { .. } => "task_failed",
        }
    }
}

impl From<IngestionError> for AppError {
    fn from(e: IngestionError) -> Self {
        AppError::Extraction {
            source_id: e.source_id().to_string(),
            message: e.to_string(),
        }
    }
}
