//! Format-specific text extraction.
//!
//! Each supported format is an [`Extractor`] registered under its lowercase
//! extension tag. Adding a format means registering another implementation.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use docchat_core::error::AppError;

mod docx;
#[cfg(feature = "pdf")]
mod pdf;
mod text;

pub use docx::DocxExtractor;
#[cfg(feature = "pdf")]
pub use pdf::PdfExtractor;
pub use text::PlainTextExtractor;

/// Raw text plus format-level metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Extracted, AppError>;
}

#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    by_tag: BTreeMap<String, Arc<dyn Extractor>>,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("formats", &self.supported_formats())
            .finish()
    }
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `txt`, `md`, `docx` and (with the `pdf` feature) `pdf`.
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.register("txt", Arc::new(PlainTextExtractor));
        reg.register("md", Arc::new(PlainTextExtractor));
        reg.register("docx", Arc::new(DocxExtractor));
        #[cfg(feature = "pdf")]
        reg.register("pdf", Arc::new(PdfExtractor));
        reg
    }

    pub fn register(&mut self, tag: &str, extractor: Arc<dyn Extractor>) {
        self.by_tag
            .insert(tag.trim_start_matches('.').to_ascii_lowercase(), extractor);
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    /// Sorted extension tags with a leading dot, e.g. `[".docx", ".md", ...]`.
    pub fn supported_formats(&self) -> Vec<String> {
        self.by_tag.keys().map(|k| format!(".{k}")).collect()
    }

    /// Look up the extractor for a file name or path by its extension.
    pub fn for_path(&self, path: &Path) -> Result<(String, Arc<dyn Extractor>), AppError> {
        let tag = extension_tag(path).unwrap_or_default();
        match self.by_tag.get(&tag) {
            Some(x) => Ok((tag, Arc::clone(x))),
            None => Err(AppError::new("INGEST_UNSUPPORTED_FORMAT", "Unsupported document format")
                .with_details(format!(
                    "file={}; extension='{}'; supported={}",
                    path.display(),
                    tag,
                    self.supported_formats().join(", ")
                ))),
        }
    }
}

/// Lowercase extension without the dot.
pub fn extension_tag(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
