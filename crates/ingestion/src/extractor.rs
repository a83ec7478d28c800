//! Text extraction
//!
//! Turns one uploaded source into evidence units with provenance:
//! - Paged documents are decoded page by page on a blocking thread
//! - Images are described by the reasoner
//!
//! A source either yields its units or fails as a whole; individual
//! unreadable pages are treated as blank.

use bytes::Bytes;
use clinicheck_common::metrics::{record_extraction_failure, record_reasoner_call};
use clinicheck_common::models::{EvidenceUnit, Modality};
use clinicheck_common::{Reasoner, ReasonerError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::errors::IngestionError;
use crate::pdf::{normalize_page_text, DocumentDecoder, LopdfDecoder};

/// Default bound on one image description round trip
const DEFAULT_DESCRIBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Image MIME types accepted for description
const IMAGE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// One uploaded file
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// File name or other caller-chosen identifier
    pub source_id: String,

    pub bytes: Bytes,

    /// MIME type declared by the uploader, if any
    pub declared_mime: Option<String>,
}

impl SourceDocument {
    pub fn new(source_id: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            source_id: source_id.into(),
            bytes: bytes.into(),
            declared_mime: None,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }
}

/// Resolved kind of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Paged document (PDF)
    Document,
    /// Raster image with its MIME type
    Image { mime_type: String },
}

impl SourceKind {
    /// Resolve the kind from the declared MIME type, then the file extension,
    /// then the leading magic bytes.
    pub fn detect(source: &SourceDocument) -> Result<Self, IngestionError> {
        if let Some(kind) = source.declared_mime.as_deref().and_then(Self::from_mime) {
            return Ok(kind);
        }

        let guessed = Path::new(&source.source_id)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| mime_guess::from_ext(ext).first())
            .and_then(|mime| Self::from_mime(mime.essence_str()));
        if let Some(kind) = guessed {
            return Ok(kind);
        }

        Self::sniff(&source.bytes).ok_or_else(|| IngestionError::UnsupportedFormat {
            source_id: source.source_id.clone(),
            detail: match &source.declared_mime {
                Some(mime) => format!("declared type {} is not a document or image", mime),
                None => "unrecognized content".to_string(),
            },
        })
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        let essence = mime.split(';').next().unwrap_or_default().trim();

        if essence == "application/pdf" {
            return Some(SourceKind::Document);
        }

        let essence = if essence == "image/jpg" { "image/jpeg" } else { essence };
        IMAGE_MIME_TYPES
            .contains(&essence)
            .then(|| SourceKind::Image {
                mime_type: essence.to_string(),
            })
    }

    fn sniff(bytes: &[u8]) -> Option<Self> {
        let image = |mime: &str| {
            Some(SourceKind::Image {
                mime_type: mime.to_string(),
            })
        };

        if bytes.starts_with(b"%PDF-") {
            Some(SourceKind::Document)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            image("image/png")
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            image("image/jpeg")
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            image("image/gif")
        } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            image("image/webp")
        } else {
            None
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            SourceKind::Document => Modality::Text,
            SourceKind::Image { .. } => Modality::ImageDerivedText,
        }
    }
}

/// Units extracted from one source, tagged with how they were produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExtraction {
    pub source_id: String,
    pub modality: Modality,
    pub units: Vec<EvidenceUnit>,
}

/// Extracts evidence units from documents and images
#[derive(Clone)]
pub struct TextExtractor {
    decoder: Arc<dyn DocumentDecoder>,
    reasoner: Arc<dyn Reasoner>,
    image_directive: String,
    describe_timeout: Duration,
}

impl TextExtractor {
    /// Create an extractor using the lopdf decoder
    pub fn new(reasoner: Arc<dyn Reasoner>, image_directive: impl Into<String>) -> Self {
        Self::with_decoder(Arc::new(LopdfDecoder), reasoner, image_directive)
    }

    pub fn with_decoder(
        decoder: Arc<dyn DocumentDecoder>,
        reasoner: Arc<dyn Reasoner>,
        image_directive: impl Into<String>,
    ) -> Self {
        Self {
            decoder,
            reasoner,
            image_directive: image_directive.into(),
            describe_timeout: DEFAULT_DESCRIBE_TIMEOUT,
        }
    }

    /// Bound each image description round trip
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.describe_timeout = timeout;
        self
    }

    /// Extract the evidence units of one source
    pub async fn extract(&self, source: &SourceDocument) -> Result<Vec<EvidenceUnit>, IngestionError> {
        self.extract_source(source).await.map(|extraction| extraction.units)
    }

    /// Extract one source, keeping its modality for aggregation
    #[instrument(skip(self, source), fields(source_id = %source.source_id, size = source.bytes.len()))]
    pub async fn extract_source(
        &self,
        source: &SourceDocument,
    ) -> Result<SourceExtraction, IngestionError> {
        let result = match SourceKind::detect(source) {
            Ok(kind) => self.extract_kind(source, kind).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(extraction) => info!(units = extraction.units.len(), "Source extracted"),
            Err(e) => {
                warn!(error = %e, "Source extraction failed");
                record_extraction_failure(e.kind());
            }
        }

        result
    }

    async fn extract_kind(
        &self,
        source: &SourceDocument,
        kind: SourceKind,
    ) -> Result<SourceExtraction, IngestionError> {
        let modality = kind.modality();
        let units = match kind {
            SourceKind::Document => self.extract_document(source).await?,
            SourceKind::Image { mime_type } => vec![self.describe_image(source, &mime_type).await?],
        };

        Ok(SourceExtraction {
            source_id: source.source_id.clone(),
            modality,
            units,
        })
    }

    async fn extract_document(
        &self,
        source: &SourceDocument,
    ) -> Result<Vec<EvidenceUnit>, IngestionError> {
        let decoder = Arc::clone(&self.decoder);
        let source_id = source.source_id.clone();
        let bytes = source.bytes.clone();

        let pages = tokio::task::spawn_blocking(move || decoder.decode_pages(&source_id, &bytes))
            .await
            .map_err(|e| IngestionError::TaskFailed {
                source_id: source.source_id.clone(),
                message: e.to_string(),
            })??;

        let page_count = pages.len();
        let units: Vec<EvidenceUnit> = pages
            .iter()
            .enumerate()
            .filter_map(|(i, page)| {
                let text = normalize_page_text(page);
                (!text.is_empty()).then(|| {
                    EvidenceUnit::new(&source.source_id, Modality::Text, Some(i as u32 + 1), text)
                })
            })
            .collect();

        debug!(
            page_count,
            blank_pages = page_count - units.len(),
            "Document decoded"
        );

        Ok(units)
    }

    async fn describe_image(
        &self,
        source: &SourceDocument,
        mime_type: &str,
    ) -> Result<EvidenceUnit, IngestionError> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.describe_timeout,
            self.reasoner
                .generate_from_image(&source.bytes, mime_type, &self.image_directive),
        )
        .await
        .unwrap_or_else(|_| {
            Err(ReasonerError::unavailable(format!(
                "image description timed out after {}s",
                self.describe_timeout.as_secs()
            )))
        });

        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        record_reasoner_call(started.elapsed(), self.reasoner.name(), label);

        let description = outcome.map_err(|cause| IngestionError::ImageDescription {
            source_id: source.source_id.clone(),
            cause,
        })?;

        if description.trim().is_empty() {
            return Err(IngestionError::EmptyDescription {
                source_id: source.source_id.clone(),
            });
        }

        Ok(EvidenceUnit::new(
            &source.source_id,
            Modality::ImageDerivedText,
            Some(1),
            description.trim(),
        ))
    }
}
