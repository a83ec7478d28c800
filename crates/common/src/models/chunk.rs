//! Bounded-size slices of an evidence bundle

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

use super::{Modality, SourceRef};

/// A run of consecutive chunk text produced by one modality
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChunkSection {
    pub modality: Modality,

    /// Byte range within the chunk text
    pub range: Range<usize>,
}

/// A slice of the bundle sized for one reasoning request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Chunk {
    /// Position of this chunk in the bundle (0-based)
    pub index: usize,

    /// Chunk content
    pub text: String,

    /// Sources and pages this chunk was derived from
    pub origin_refs: BTreeSet<SourceRef>,

    /// Modality runs covering the text, in order
    #[serde(default)]
    pub sections: Vec<ChunkSection>,
}

impl Chunk {
    /// Number of characters in the chunk
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Text of each modality run, in order
    pub fn sections(&self) -> Vec<(Modality, &str)> {
        self.sections
            .iter()
            .filter_map(|s| self.text.get(s.range.clone()).map(|text| (s.modality, text)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_slice_text() {
        let chunk = Chunk {
            index: 0,
            text: "Hb 13\nA wrist x-ray".to_string(),
            origin_refs: BTreeSet::new(),
            sections: vec![
                ChunkSection { modality: Modality::Text, range: 0..5 },
                ChunkSection { modality: Modality::ImageDerivedText, range: 6..19 },
            ],
        };

        assert_eq!(
            chunk.sections(),
            vec![(Modality::Text, "Hb 13"), (Modality::ImageDerivedText, "A wrist x-ray")]
        );
    }
}
