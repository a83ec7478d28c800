//! Context aggregation
//!
//! Merges per-source extractions into one ordered evidence bundle.

use clinicheck_common::config::AggregationPolicy;
use clinicheck_common::models::{EvidenceBundle, Modality};
use tracing::debug;

use crate::extractor::SourceExtraction;

/// Merge extractions in arrival order.
///
/// Under [`AggregationPolicy::Replace`] only the last document source
/// contributes; image-derived sources always accumulate.
pub fn aggregate(sources: Vec<SourceExtraction>, policy: AggregationPolicy) -> EvidenceBundle {
    let last_document = sources
        .iter()
        .rposition(|s| s.modality == Modality::Text);

    let source_count = sources.len();
    let bundle: EvidenceBundle = sources
        .into_iter()
        .enumerate()
        .filter(|(i, source)| match policy {
            AggregationPolicy::Concatenate => true,
            AggregationPolicy::Replace => {
                source.modality != Modality::Text || Some(*i) == last_document
            }
        })
        .flat_map(|(_, source)| source.units)
        .collect();

    debug!(
        sources = source_count,
        units = bundle.len(),
        policy = ?policy,
        "Evidence aggregated"
    );

    bundle
}
