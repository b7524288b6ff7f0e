use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Which hosted backend serves generation and embeddings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Ollama,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// Tunables for one pass through the pipeline.
///
/// A value of this type is never edited while a request uses it: hosts go
/// through [`ConfigHandle::retune`] to publish a new snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    // Chunking
    pub chunk_size: usize,
    pub chunk_overlap: usize,

    // Retrieval
    pub top_k: usize,
    pub confidence_threshold: f64,
    /// Cutoff for the `low_confidence_count` metric. Deliberately separate from
    /// `confidence_threshold`.
    pub low_confidence_cutoff: f64,

    // Generation
    pub provider: Provider,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub generation_timeout_secs: u64,
    pub embedding_timeout_secs: u64,
    pub openai_base_url: String,
    pub ollama_base_url: String,
    #[serde(skip_serializing)]
    pub openai_api_key: String,

    // Memory
    pub memory_window: usize,

    // Persistence
    pub collection_name: String,
    pub persist_directory: PathBuf,
    pub state_directory: PathBuf,
    pub upload_directory: PathBuf,

    // Prompt
    pub assistant_name: String,
    pub response_language: String,
    pub fallback_answer: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
            confidence_threshold: 0.7,
            low_confidence_cutoff: 0.7,
            provider: Provider::OpenAi,
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            generation_timeout_secs: 60,
            embedding_timeout_secs: 30,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            openai_api_key: String::new(),
            memory_window: 5,
            collection_name: "documents".to_string(),
            persist_directory: PathBuf::from("vectorstore"),
            state_directory: PathBuf::from(".tmp"),
            upload_directory: PathBuf::from("data/uploads"),
            assistant_name: "Document Assistant".to_string(),
            response_language: "English".to_string(),
            fallback_answer:
                "Sorry, something went wrong while processing your question. Please try again."
                    .to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the TOML file (when given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut cfg = match path {
            Some(p) => Self::from_toml_file(p)?,
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, AppError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::new("CONFIG_READ_FAILED", "Failed to read config file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::from_toml_str(&raw).map_err(|e| {
            let details = format!(
                "path={}; err={}",
                path.display(),
                e.details.as_deref().unwrap_or("")
            );
            e.with_details(details)
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| {
            AppError::new("CONFIG_PARSE_FAILED", "Failed to parse config")
                .with_details(e.to_string())
        })
    }

    /// Apply environment overrides through `lookup` so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.openai_api_key = v;
        }
        if let Some(v) = lookup("DOCCHAT_CHAT_MODEL").filter(|v| !v.trim().is_empty()) {
            self.chat_model = v;
        }
        if let Some(v) = lookup("DOCCHAT_EMBEDDING_MODEL").filter(|v| !v.trim().is_empty()) {
            self.embedding_model = v;
        }
        if let Some(p) = lookup("DOCCHAT_PROVIDER").and_then(|v| Provider::parse(&v)) {
            self.provider = p;
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.chunk_size == 0 {
            return Err(AppError::new("CONFIG_INVALID", "chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(AppError::new(
                "CONFIG_INVALID",
                "chunk_overlap must be smaller than chunk_size",
            )
            .with_details(format!(
                "chunk_size={}; chunk_overlap={}",
                self.chunk_size, self.chunk_overlap
            )));
        }
        if self.top_k == 0 {
            return Err(AppError::new("CONFIG_INVALID", "top_k must be greater than zero"));
        }
        if self.memory_window == 0 {
            return Err(AppError::new("CONFIG_INVALID", "memory_window must be greater than zero"));
        }
        for (name, v) in [
            ("confidence_threshold", self.confidence_threshold),
            ("low_confidence_cutoff", self.low_confidence_cutoff),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(AppError::new("CONFIG_INVALID", format!("{name} must be within [0, 1]"))
                    .with_details(format!("{name}={v}")));
            }
        }
        if self.collection_name.trim().is_empty() {
            return Err(AppError::new("CONFIG_INVALID", "collection_name is required"));
        }
        Ok(())
    }

    /// Serializable view with the API key masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let serde_json::Value::Object(map) = &mut v {
            let masked = if self.openai_api_key.is_empty() { "" } else { "***" };
            map.insert("openai_api_key".to_string(), serde_json::Value::from(masked));
        }
        v
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory_window * 2
    }
}

/// Shared owner of the current configuration snapshot.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<PipelineConfig>>>,
}

impl ConfigHandle {
    pub fn new(cfg: PipelineConfig) -> Result<Self, AppError> {
        cfg.validate()?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(cfg))),
        })
    }

    pub fn snapshot(&self) -> Arc<PipelineConfig> {
        match self.current.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publish `cfg` for subsequent requests. Snapshots already handed out are unaffected.
    pub fn retune(&self, cfg: PipelineConfig) -> Result<Arc<PipelineConfig>, AppError> {
        cfg.validate()?;
        let next = Arc::new(cfg);
        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&next);
        tracing::info!(
            chunk_size = next.chunk_size,
            top_k = next.top_k,
            confidence_threshold = next.confidence_threshold,
            memory_window = next.memory_window,
            "configuration retuned"
        );
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_given_fields() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
chunk_size = 500
chunk_overlap = 50
provider = "ollama"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.chunk_size, 500);
        assert_eq!(cfg.chunk_overlap, 50);
        assert_eq!(cfg.provider, Provider::Ollama);
        assert_eq!(cfg.top_k, 4);
        assert_eq!(cfg.memory_window, 5);
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let mut cfg = PipelineConfig::default();
        cfg.apply_env(|k| match k {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "DOCCHAT_PROVIDER" => Some("Ollama".to_string()),
            "DOCCHAT_CHAT_MODEL" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(cfg.openai_api_key, "sk-test");
        assert_eq!(cfg.provider, Provider::Ollama);
        assert_eq!(cfg.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let cfg = PipelineConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..PipelineConfig::default()
        };
        let err = cfg.validate().expect_err("invalid");
        assert_eq!(err.code, "CONFIG_INVALID");
    }

    #[test]
    fn redacted_masks_api_key() {
        let cfg = PipelineConfig {
            openai_api_key: "sk-secret".to_string(),
            ..PipelineConfig::default()
        };
        let v = cfg.redacted();
        assert_eq!(v["openai_api_key"], "***");
        assert!(!v.to_string().contains("sk-secret"));
    }

    #[test]
    fn retune_swaps_snapshot_without_touching_old_one() {
        let handle = ConfigHandle::new(PipelineConfig::default()).expect("handle");
        let before = handle.snapshot();
        handle
            .retune(PipelineConfig {
                top_k: 8,
                ..PipelineConfig::default()
            })
            .expect("retune");
        assert_eq!(before.top_k, 4);
        assert_eq!(handle.snapshot().top_k, 8);

        let bad = PipelineConfig {
            memory_window: 0,
            ..PipelineConfig::default()
        };
        assert!(handle.retune(bad).is_err());
        assert_eq!(handle.snapshot().top_k, 8);
    }
}
