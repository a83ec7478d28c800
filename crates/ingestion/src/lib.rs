//! CliniCheck Ingestion
//!
//! Turns uploaded files into bounded pieces of evidence:
//! - Text extraction from PDFs (lopdf) and images (reasoner description)
//! - Aggregation of per-source units into one evidence bundle
//! - Chunking of the bundle for a bounded-context reasoner

pub mod aggregator;
pub mod chunker;
pub mod errors;
pub mod extractor;
pub mod pdf;

pub use aggregator::aggregate;
pub use chunker::{chunk, ChunkingConfig};
pub use errors::IngestionError;
pub use extractor::{SourceDocument, SourceExtraction, SourceKind, TextExtractor};
pub use pdf::{DocumentDecoder, LopdfDecoder};
