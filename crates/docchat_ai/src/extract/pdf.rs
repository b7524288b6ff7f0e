use std::collections::BTreeMap;

use docchat_core::error::AppError;

use super::text::normalize_newlines;
use super::{Extracted, Extractor};

/// PDF text layer. Scanned pages without text yield nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extracted, AppError> {
        let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            AppError::new("INGEST_DECODE_FAILED", "Failed to extract text from PDF")
                .with_details(e.to_string())
        })?;
        let mut metadata = BTreeMap::new();
        // Form feeds separate pages in the extracted text.
        let pages = text.matches('\u{c}').count().max(1);
        metadata.insert("pages".to_string(), pages.to_string());
        Ok(Extracted {
            text: normalize_newlines(&text.replace('\u{c}', "\n\n")),
            metadata,
        })
    }
}
