//! Evidence units and bundles

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Separator placed between units when a bundle is rendered as text
pub const UNIT_SEPARATOR: &str = "\n";

/// Where the content of an evidence unit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Text decoded from a document page
    Text,
    /// Text produced by describing an image
    ImageDerivedText,
}

/// One piece of extracted text with provenance. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EvidenceUnit {
    source_id: String,
    modality: Modality,
    page_or_index: Option<u32>,
    content: String,
}

impl EvidenceUnit {
    pub fn new(
        source_id: impl Into<String>,
        modality: Modality,
        page_or_index: Option<u32>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            modality,
            page_or_index,
            content: content.into(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn page_or_index(&self) -> Option<u32> {
        self.page_or_index
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// True when the content has no non-whitespace character
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            source_id: self.source_id.clone(),
            page_or_index: self.page_or_index,
        }
    }
}

/// Provenance reference carried by chunks
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct SourceRef {
    pub source_id: String,
    pub page_or_index: Option<u32>,
}

/// Ordered evidence for one analysis request.
///
/// Never contains a blank unit: construction and `push` drop them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EvidenceBundle {
    units: Vec<EvidenceUnit>,
}

impl EvidenceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a unit, silently dropping blank content. Returns whether it was kept.
    pub fn push(&mut self, unit: EvidenceUnit) -> bool {
        if unit.is_blank() {
            return false;
        }
        self.units.push(unit);
        true
    }

    pub fn units(&self) -> &[EvidenceUnit] {
        &self.units
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether any unit came from an image
    pub fn has_modality(&self, modality: Modality) -> bool {
        self.units.iter().any(|u| u.modality == modality)
    }

    /// Distinct source ids in first-appearance order
    pub fn source_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for unit in &self.units {
            if !ids.contains(&unit.source_id.as_str()) {
                ids.push(&unit.source_id);
            }
        }
        ids
    }

    /// Unit contents joined by [`UNIT_SEPARATOR`]
    pub fn text(&self) -> String {
        self.units
            .iter()
            .map(|u| u.content.as_str())
            .collect::<Vec<_>>()
            .join(UNIT_SEPARATOR)
    }

    /// Byte range each unit occupies in [`EvidenceBundle::text`], in unit order
    pub fn spans(&self) -> Vec<(Range<usize>, &EvidenceUnit)> {
        let mut spans = Vec::with_capacity(self.units.len());
        let mut offset = 0;

        for (i, unit) in self.units.iter().enumerate() {
            if i > 0 {
                offset += UNIT_SEPARATOR.len();
            }
            let end = offset + unit.content.len();
            spans.push((offset..end, unit));
            offset = end;
        }

        spans
    }

    /// Total length of the rendered text in characters
    pub fn char_len(&self) -> usize {
        let separators = self.units.len().saturating_sub(1) * UNIT_SEPARATOR.chars().count();
        self.units.iter().map(|u| u.content.chars().count()).sum::<usize>() + separators
    }
}

impl FromIterator<EvidenceUnit> for EvidenceBundle {
    fn from_iter<I: IntoIterator<Item = EvidenceUnit>>(iter: I) -> Self {
        let mut bundle = EvidenceBundle::new();
        for unit in iter {
            bundle.push(unit);
        }
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(source: &str, page: u32, content: &str) -> EvidenceUnit {
        EvidenceUnit::new(source, Modality::Text, Some(page), content)
    }

    #[test]
    fn test_blank_units_are_dropped() {
        let bundle: EvidenceBundle = vec![
            unit("a.pdf", 1, ""),
            unit("a.pdf", 2, "  \n "),
            unit("a.pdf", 3, "Hb: 13 g/dL"),
        ]
        .into_iter()
        .collect();

        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.units()[0].content(), "Hb: 13 g/dL");
    }

    #[test]
    fn test_spans_match_text() {
        let bundle: EvidenceBundle = vec![
            unit("a.pdf", 1, "first page"),
            unit("b.pdf", 1, "second"),
        ]
        .into_iter()
        .collect();

        let text = bundle.text();
        assert_eq!(text, "first page\nsecond");

        for (range, unit) in bundle.spans() {
            assert_eq!(&text[range], unit.content());
        }
        assert_eq!(bundle.char_len(), text.chars().count());
    }

    #[test]
    fn test_source_ids_in_arrival_order() {
        let bundle: EvidenceBundle = vec![
            unit("b.pdf", 1, "x"),
            unit("a.pdf", 1, "y"),
            unit("b.pdf", 2, "z"),
        ]
        .into_iter()
        .collect();

        assert_eq!(bundle.source_ids(), vec!["b.pdf", "a.pdf"]);
    }
}
