use std::collections::BTreeMap;

use docchat_core::error::AppError;

use super::{Extracted, Extractor};

/// UTF-8 text and Markdown. A leading byte-order mark is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extracted, AppError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|e| {
            AppError::new("INGEST_DECODE_FAILED", "Text document is not valid UTF-8")
                .with_details(e.to_string())
        })?;
        Ok(Extracted {
            text: normalize_newlines(text),
            metadata: BTreeMap::new(),
        })
    }
}

pub(crate) fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}
