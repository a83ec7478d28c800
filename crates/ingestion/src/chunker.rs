//! Text chunking module
//!
//! Splits bundle text into bounded segments for a bounded-context reasoner.
//! Lengths are counted in characters; every cut lands on a char boundary.

use clinicheck_common::config::{ChunkPolicy, PipelineConfig};
use clinicheck_common::metrics::record_chunks;
use clinicheck_common::models::{Chunk, ChunkSection, EvidenceBundle, EvidenceUnit};
use std::collections::BTreeSet;
use std::ops::Range;
use text_splitter::{ChunkConfig, TextSplitter};
use tracing::debug;

/// Paragraph, sentence and line breaks in order of preference
const PARAGRAPH_BREAK: &str = "\n\n";
const SENTENCE_ENDINGS: &[&str] = &[". ", "! ", "? ", ".\n", "!\n", "?\n"];
const LINE_BREAK: &str = "\n";

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub max_chunk_length: usize,
    pub policy: ChunkPolicy,
    /// How far before the hard limit a break may be searched for, in characters
    pub lookback_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: clinicheck_common::DEFAULT_MAX_CHUNK_LENGTH,
            policy: ChunkPolicy::default(),
            lookback_window: 200,
        }
    }
}

impl From<&PipelineConfig> for ChunkingConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_chunk_length: config.max_chunk_length,
            policy: config.chunk_policy,
            lookback_window: config.lookback_window,
        }
    }
}

/// Split a bundle into chunks.
///
/// An empty bundle yields no chunks; a bundle that fits yields exactly one.
pub fn chunk(bundle: &EvidenceBundle, config: &ChunkingConfig) -> Vec<Chunk> {
    let text = bundle.text();
    if text.is_empty() {
        return Vec::new();
    }

    let max = config.max_chunk_length.max(1);
    let ranges = if text.chars().count() <= max {
        vec![0..text.len()]
    } else {
        match config.policy {
            ChunkPolicy::Fixed => fixed_ranges(&text, max),
            ChunkPolicy::Boundary => {
                boundary_ranges(&text, max, config.lookback_window.min(max - 1))
            }
            ChunkPolicy::Semantic => semantic_ranges(&text, max),
        }
    };

    let spans = bundle.spans();
    let chunks: Vec<Chunk> = ranges
        .into_iter()
        .enumerate()
        .map(|(index, range)| {
            let overlapping: Vec<_> = spans
                .iter()
                .filter(|(span, _)| span.start < range.end && range.start < span.end)
                .collect();

            Chunk {
                index,
                origin_refs: overlapping
                    .iter()
                    .map(|(_, unit)| unit.source_ref())
                    .collect::<BTreeSet<_>>(),
                sections: modality_runs(&overlapping, &range),
                text: text[range].to_string(),
            }
        })
        .collect();

    debug!(
        input_chars = bundle.char_len(),
        chunk_count = chunks.len(),
        max_chunk_length = max,
        policy = ?config.policy,
        "Text chunked"
    );
    record_chunks(policy_label(config.policy), chunks.len());

    chunks
}

/// Merge the overlapping unit spans into runs of one modality, relative to `range`
fn modality_runs(
    overlapping: &[&(Range<usize>, &EvidenceUnit)],
    range: &Range<usize>,
) -> Vec<ChunkSection> {
    let mut runs: Vec<ChunkSection> = Vec::new();
    for (span, unit) in overlapping {
        let start = span.start.max(range.start) - range.start;
        let end = span.end.min(range.end) - range.start;

        match runs.last_mut() {
            Some(run) if run.modality == unit.modality() => run.range.end = end,
            _ => runs.push(ChunkSection {
                modality: unit.modality(),
                range: start..end,
            }),
        }
    }
    runs
}

fn policy_label(policy: ChunkPolicy) -> &'static str {
    match policy {
        ChunkPolicy::Fixed => "fixed",
        ChunkPolicy::Boundary => "boundary",
        ChunkPolicy::Semantic => "semantic",
    }
}

/// Byte offset reached after advancing `chars` characters from `start`
fn advance_chars(text: &str, start: usize, chars: usize) -> usize {
    text[start..]
        .char_indices()
        .nth(chars)
        .map(|(i, _)| start + i)
        .unwrap_or(text.len())
}

fn fixed_ranges(text: &str, max: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = advance_chars(text, start, max);
        ranges.push(start..end);
        start = end;
    }

    ranges
}

fn boundary_ranges(text: &str, max: usize, lookback: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let hard_end = advance_chars(text, start, max);
        if hard_end == text.len() {
            ranges.push(start..hard_end);
            break;
        }

        let window_start = advance_chars(text, start, max - lookback);
        let end = find_break(&text[window_start..hard_end])
            .map(|offset| window_start + offset)
            .unwrap_or(hard_end);

        ranges.push(start..end);
        start = end;
    }

    ranges
}

/// Find the preferred break in `window`, returning the offset just past it
fn find_break(window: &str) -> Option<usize> {
    if let Some(pos) = window.rfind(PARAGRAPH_BREAK) {
        return Some(pos + PARAGRAPH_BREAK.len());
    }

    let sentence = SENTENCE_ENDINGS
        .iter()
        .filter_map(|ending| window.rfind(ending).map(|pos| pos + ending.len()))
        .max();
    if sentence.is_some() {
        return sentence;
    }

    window.rfind(LINE_BREAK).map(|pos| pos + LINE_BREAK.len())
}

fn semantic_ranges(text: &str, max: usize) -> Vec<Range<usize>> {
    let splitter = TextSplitter::new(ChunkConfig::new(max).with_trim(false));

    splitter
        .chunk_indices(text)
        .map(|(offset, chunk)| offset..offset + chunk.len())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicheck_common::models::{EvidenceUnit, Modality, SourceRef};

    fn bundle_of(pages: &[&str]) -> EvidenceBundle {
        pages
            .iter()
            .enumerate()
            .map(|(i, p)| EvidenceUnit::new("report.pdf", Modality::Text, Some(i as u32 + 1), *p))
            .collect()
    }

    fn config(max: usize, policy: ChunkPolicy, lookback: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chunk_length: max,
            policy,
            lookback_window: lookback,
        }
    }

    fn joined(chunks: &[Chunk]) -> String {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn test_fitting_bundle_is_single_chunk() {
        let bundle = bundle_of(&["Hb: 13 g/dL", "WBC: 6.1"]);
        for policy in [ChunkPolicy::Fixed, ChunkPolicy::Boundary, ChunkPolicy::Semantic] {
            let chunks = chunk(&bundle, &config(1000, policy, 200));
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].text, bundle.text());
            assert_eq!(chunks[0].index, 0);
        }
    }

    #[test]
    fn test_sections_follow_unit_modality() {
        let bundle: EvidenceBundle = vec![
            EvidenceUnit::new("labs.pdf", Modality::Text, Some(1), "Hb: 13 g/dL"),
            EvidenceUnit::new("labs.pdf", Modality::Text, Some(2), "WBC: 6.1"),
            EvidenceUnit::new("xray.png", Modality::ImageDerivedText, Some(1), "Clear lung fields"),
        ]
        .into_iter()
        .collect();

        let chunks = chunk(&bundle, &config(1000, ChunkPolicy::Boundary, 200));

        assert_eq!(
            chunks[0].sections(),
            vec![
                (Modality::Text, "Hb: 13 g/dL\nWBC: 6.1"),
                (Modality::ImageDerivedText, "Clear lung fields"),
            ]
        );
    }

    #[test]
    fn test_empty_bundle_has_no_chunks() {
        let chunks = chunk(&EvidenceBundle::new(), &ChunkingConfig::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_fixed_reconstructs_and_respects_limit() {
        let text = "Glucose 5.4 mmol/L. ".repeat(40);
        let bundle = bundle_of(&[&text, "Cholesterol normal."]);
        let chunks = chunk(&bundle, &config(64, ChunkPolicy::Fixed, 16));

        assert!(chunks.len() > 1);
        assert_eq!(joined(&chunks), bundle.text());
        assert!(chunks.iter().all(|c| c.char_len() <= 64));
        assert!(chunks[..chunks.len() - 1].iter().all(|c| c.char_len() == 64));
    }

    #[test]
    fn test_boundary_prefers_paragraph_break() {
        let first = "a".repeat(70);
        let text = format!("{}\n\nSecond paragraph. It continues for a while longer.", first);
        let bundle = bundle_of(&[&text]);

        let chunks = chunk(&bundle, &config(100, ChunkPolicy::Boundary, 40));

        assert_eq!(chunks[0].text, format!("{}\n\n", first));
        assert_eq!(joined(&chunks), bundle.text());
    }

    #[test]
    fn test_boundary_falls_back_to_sentence_end() {
        let text = format!("{}. {}", "b".repeat(80), "c".repeat(60));
        let bundle = bundle_of(&[&text]);

        let chunks = chunk(&bundle, &config(100, ChunkPolicy::Boundary, 30));

        assert!(chunks[0].text.ends_with(". "));
        assert_eq!(chunks[0].char_len(), 82);
        assert_eq!(joined(&chunks), text);
    }

    #[test]
    fn test_boundary_hard_cut_without_breaks() {
        let text = "x".repeat(250);
        let bundle = bundle_of(&[&text]);

        let chunks = chunk(&bundle, &config(100, ChunkPolicy::Boundary, 20));

        let lengths: Vec<usize> = chunks.iter().map(|c| c.char_len()).collect();
        assert_eq!(lengths, vec![100, 100, 50]);
    }

    #[test]
    fn test_multibyte_text_is_char_safe() {
        let text = "Hämoglobin niedrig 🩺 ".repeat(30);
        let bundle = bundle_of(&[&text]);

        for policy in [ChunkPolicy::Fixed, ChunkPolicy::Boundary] {
            let chunks = chunk(&bundle, &config(37, policy, 10));
            assert_eq!(joined(&chunks), text);
            assert!(chunks.iter().all(|c| c.char_len() <= 37));
        }
    }

    #[test]
    fn test_origin_refs_follow_spans() {
        let bundle = bundle_of(&[&"p".repeat(50), &"q".repeat(50)]);
        let chunks = chunk(&bundle, &config(40, ChunkPolicy::Fixed, 10));

        let page = |n| SourceRef {
            source_id: "report.pdf".to_string(),
            page_or_index: Some(n),
        };

        assert_eq!(chunks[0].origin_refs, BTreeSet::from([page(1)]));
        assert_eq!(chunks[1].origin_refs, BTreeSet::from([page(1), page(2)]));
        assert_eq!(chunks.last().unwrap().origin_refs, BTreeSet::from([page(2)]));
    }

    #[test]
    fn test_semantic_chunks_are_bounded() {
        let text = "The patient reports fatigue. Iron levels are low. ".repeat(20);
        let bundle = bundle_of(&[&text]);

        let chunks = chunk(&bundle, &config(120, ChunkPolicy::Semantic, 20));

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.char_len() <= 120 && !c.text.is_empty()));
        assert!(chunks.windows(2).all(|w| w[0].index + 1 == w[1].index));
    }
}
