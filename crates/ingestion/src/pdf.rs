//! PDF text extraction module
//!
//! Decodes paged documents into per-page text using lopdf and normalizes
//! each page before it becomes evidence.

use lopdf::content::Content;
use lopdf::{Document, Object};
use tracing::{debug, warn};

use crate::errors::IngestionError;

/// Capability that turns document bytes into page texts, in page order.
///
/// Implementations are synchronous and CPU-bound; callers run them on a
/// blocking thread.
pub trait DocumentDecoder: Send + Sync {
    fn decode_pages(&self, source_id: &str, bytes: &[u8]) -> Result<Vec<String>, IngestionError>;
}

/// Production decoder backed by lopdf
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfDecoder;

impl DocumentDecoder for LopdfDecoder {
    fn decode_pages(&self, source_id: &str, bytes: &[u8]) -> Result<Vec<String>, IngestionError> {
        let doc = Document::load_mem(bytes).map_err(|e| IngestionError::PdfParse {
            source_id: source_id.to_string(),
            message: format!("Failed to load PDF: {}", e),
        })?;

        if doc.is_encrypted() {
            return Err(IngestionError::PdfParse {
                source_id: source_id.to_string(),
                message: "Document is encrypted".to_string(),
            });
        }

        let pages = doc.get_pages();
        debug!(source_id, page_count = pages.len(), "Extracting text from PDF");

        let texts = pages
            .iter()
            .map(|(&page_num, &page_id)| match extract_page_text(&doc, page_num, page_id) {
                Ok(text) => text,
                Err(e) => {
                    warn!(source_id, page = page_num, error = %e, "Unreadable page treated as blank");
                    String::new()
                }
            })
            .collect();

        Ok(texts)
    }
}

/// Extract text from a single page, falling back to the raw content stream
fn extract_page_text(
    doc: &Document,
    page_num: u32,
    page_id: lopdf::ObjectId,
) -> Result<String, lopdf::Error> {
    if let Ok(text) = doc.extract_text(&[page_num]) {
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }

    let content = doc.get_page_content(page_id)?;
    extract_text_from_content(&content)
}

/// Walk the text-showing operators (`Tj`, `TJ`, `'`, `"`) of a content stream
fn extract_text_from_content(content: &[u8]) -> Result<String, lopdf::Error> {
    let content = Content::decode(content)?;
    let mut text = String::new();

    for operation in &content.operations {
        match operation.operator.as_str() {
            "Tj" | "'" => {
                if let Some(Object::String(bytes, _)) = operation.operands.first() {
                    text.push_str(&decode_pdf_bytes(bytes));
                }
            }
            "\"" => {
                if let Some(Object::String(bytes, _)) = operation.operands.get(2) {
                    text.push_str(&decode_pdf_bytes(bytes));
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operation.operands.first() {
                    for item in items {
                        if let Object::String(bytes, _) = item {
                            text.push_str(&decode_pdf_bytes(bytes));
                        }
                    }
                }
            }
            "ET" | "T*" => text.push('\n'),
            _ => {}
        }
    }

    Ok(text)
}

/// Decode a PDF string; UTF-16BE when it carries a BOM, Latin-1 otherwise
fn decode_pdf_bytes(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = rest
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    bytes.iter().map(|&b| b as char).collect()
}

/// Normalize one page of extracted text.
///
/// Collapses horizontal whitespace, drops blank lines, strips the BOM and
/// folds typographic quotes to ASCII. A blank page normalizes to "".
pub fn normalize_page_text(text: &str) -> String {
    let text = text
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a one-page-per-entry PDF; an empty entry yields a page with no text
    pub(crate) fn make_test_pdf(pages: &[&str]) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::Stream;

        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = if text.is_empty() {
                String::new()
            } else {
                format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text)
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_normalize_page_text() {
        let input = "\u{FEFF}Hemoglobin \u{00A0} 13.2\tg/dL\n\n   \n\u{201C}Normal\u{201D}  range";
        assert_eq!(
            normalize_page_text(input),
            "Hemoglobin 13.2 g/dL\n\"Normal\" range"
        );
    }

    #[test]
    fn test_blank_page_normalizes_to_empty() {
        assert_eq!(normalize_page_text(" \n\t \n"), "");
    }

    #[test]
    fn test_decode_pdf_bytes() {
        assert_eq!(decode_pdf_bytes(b"Hb: 13"), "Hb: 13");
        assert_eq!(decode_pdf_bytes(&[0xFE, 0xFF, 0x00, 0x48, 0x00, 0x62]), "Hb");
    }

    #[test]
    fn test_content_stream_fallback() {
        let text = extract_text_from_content(b"BT /F1 12 Tf [(Gluc) -20 (ose)] TJ ET").unwrap();
        assert_eq!(text.trim(), "Glucose");
    }

    #[test]
    fn test_decode_generated_pdf() {
        let bytes = make_test_pdf(&["Hb: 13 g/dL", ""]);
        let pages = LopdfDecoder.decode_pages("report.pdf", &bytes).unwrap();

        assert_eq!(pages.len(), 2);
        assert!(normalize_page_text(&pages[0]).contains("13 g/dL"));
        assert_eq!(normalize_page_text(&pages[1]), "");
    }

    #[test]
    fn test_corrupt_bytes_fail_with_source_id() {
        let err = LopdfDecoder
            .decode_pages("broken.pdf", b"%PDF-1.4 not really")
            .unwrap_err();
        assert_eq!(err.source_id(), "broken.pdf");
        assert!(matches!(err, IngestionError::PdfParse { .. }));
    }
}
