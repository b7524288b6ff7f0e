use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape shared by the pipeline crates and surfaced to hosts.
///
/// `code` is a SCREAMING_SNAKE identifier whose prefix names the failing layer
/// (see [`ErrorCategory`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

/// Coarse failure classes used to decide propagation policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Unsupported format, missing file or path. Caller-visible, isolated per file in batches.
    Ingestion,
    /// Embedding or similarity search failures.
    Retrieval,
    /// Generation backend failures. Absorbed by the chat pipeline.
    Generation,
    /// Log, metrics or collection writes.
    Persistence,
    Config,
    Internal,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn category(&self) -> ErrorCategory {
        let code = self.code.as_str();
        if code.starts_with("INGEST_") {
            ErrorCategory::Ingestion
        } else if code.starts_with("RETRIEVAL_") || code.starts_with("EMBEDDINGS_") {
            ErrorCategory::Retrieval
        } else if code.starts_with("GENERATION_") {
            ErrorCategory::Generation
        } else if code.starts_with("PERSIST_")
            || code.starts_with("STORE_")
            || code.starts_with("DB_")
        {
            ErrorCategory::Persistence
        } else if code.starts_with("CONFIG_") {
            ErrorCategory::Config
        } else {
            ErrorCategory::Internal
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(d) = self.details.as_deref() {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}
