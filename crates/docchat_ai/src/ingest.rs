use std::fs;
use std::path::{Path, PathBuf};

use docchat_core::domain::Fragment;
use docchat_core::error::AppError;
use serde::Serialize;

use crate::chunking::TextSplitter;
use crate::extract::{extension_tag, ExtractorRegistry};

/// A file that was skipped during a directory ingestion.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub error: AppError,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub fragments: Vec<Fragment>,
    pub files_loaded: usize,
    pub failures: Vec<FileFailure>,
}

/// Reads files through the extractor registry and splits them into fragments.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    registry: ExtractorRegistry,
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::new(ExtractorRegistry::with_defaults())
    }
}

impl DocumentLoader {
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ExtractorRegistry {
        &self.registry
    }

    pub fn supported_formats(&self) -> Vec<String> {
        self.registry.supported_formats()
    }

    pub fn load_file(
        &self,
        path: &Path,
        splitter: &TextSplitter,
    ) -> Result<Vec<Fragment>, AppError> {
        if !path.is_file() {
            return Err(AppError::new("INGEST_FILE_NOT_FOUND", "Document not found")
                .with_details(format!("path={}", path.display())));
        }
        let (tag, extractor) = self.registry.for_path(path)?;
        let bytes = fs::read(path).map_err(|e| {
            AppError::new("INGEST_READ_FAILED", "Failed to read document")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        let extracted = extractor.extract(&bytes).map_err(|e| {
            let details = match e.details.as_deref() {
                Some(d) => format!("path={}; {}", path.display(), d),
                None => format!("path={}", path.display()),
            };
            e.with_details(details)
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut metadata = extracted.metadata;
        metadata.insert("source_file".to_string(), file_name.clone());
        metadata.insert("file_type".to_string(), tag);
        metadata.insert("file_path".to_string(), path.display().to_string());

        let fragments = splitter.split(&extracted.text, &path.display().to_string(), &metadata);
        if fragments.is_empty() {
            tracing::warn!(file = %file_name, "no text extracted");
        } else {
            tracing::info!(file = %file_name, fragments = fragments.len(), "document loaded");
        }
        Ok(fragments)
    }

    /// Load every supported file directly inside `dir`, in name order.
    /// A file that fails is recorded in the report and skipped.
    pub fn load_directory(
        &self,
        dir: &Path,
        splitter: &TextSplitter,
    ) -> Result<IngestReport, AppError> {
        if !dir.is_dir() {
            return Err(AppError::new("INGEST_NOT_A_DIRECTORY", "Ingestion path is not a directory")
                .with_details(format!("path={}", dir.display())));
        }
        let entries = fs::read_dir(dir).map_err(|e| {
            AppError::new("INGEST_READ_FAILED", "Failed to list directory")
                .with_details(format!("path={}; err={}", dir.display(), e))
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| extension_tag(p).is_some_and(|t| self.registry.supports(&t)))
            .collect();
        files.sort();

        let mut report = IngestReport::default();
        for path in files {
            match self.load_file(&path, splitter) {
                Ok(mut fragments) => {
                    report.files_loaded += 1;
                    report.fragments.append(&mut fragments);
                }
                Err(error) => {
                    tracing::warn!(file = %path.display(), code = %error.code, "skipping document");
                    report.failures.push(FileFailure {
                        file: path.display().to_string(),
                        error,
                    });
                }
            }
        }
        tracing::info!(
            dir = %dir.display(),
            files = report.files_loaded,
            failed = report.failures.len(),
            fragments = report.fragments.len(),
            "directory loaded"
        );
        Ok(report)
    }

    /// Save uploaded bytes under `upload_dir` and load the saved copy.
    pub fn load_uploaded_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
        upload_dir: &Path,
        splitter: &TextSplitter,
    ) -> Result<Vec<Fragment>, AppError> {
        let name = sanitize_file_name(filename)?;
        // Reject before anything touches the disk.
        self.registry.for_path(Path::new(&name))?;

        fs::create_dir_all(upload_dir).map_err(|e| {
            AppError::new("INGEST_WRITE_FAILED", "Failed to create upload directory")
                .with_details(format!("path={}; err={}", upload_dir.display(), e))
        })?;
        let dest = upload_dir.join(&name);
        fs::write(&dest, bytes).map_err(|e| {
            AppError::new("INGEST_WRITE_FAILED", "Failed to save uploaded file")
                .with_details(format!("path={}; err={}", dest.display(), e))
        })?;
        self.load_file(&dest, splitter)
    }
}

/// Final path component of `filename`; anything that would escape the upload dir is rejected.
fn sanitize_file_name(filename: &str) -> Result<String, AppError> {
    let normalized = filename.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(AppError::new("INGEST_INVALID_FILENAME", "Uploaded file name is invalid")
            .with_details(format!("filename={filename}")));
    }
    Ok(name.to_string())
}
