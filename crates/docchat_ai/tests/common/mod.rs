#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use docchat_ai::chat::ChatPipeline;
use docchat_ai::embeddings::Embedder;
use docchat_ai::extract::ExtractorRegistry;
use docchat_ai::llm::{ChatModel, GenerationParams};
use docchat_core::config::PipelineConfig;
use docchat_core::domain::ConversationTurn;
use docchat_core::error::AppError;

pub const VOCAB: [&str; 5] = ["refund", "shipping", "warranty", "hours", "price"];

/// Keyword counts plus a constant bias dimension. Inputs containing
/// "explode" fail.
pub struct KeywordEmbedder;

impl Embedder for KeywordEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let lower = input.to_lowercase();
        if lower.contains("explode") {
            return Err(AppError::new("EMBEDDINGS_FAILED", "mock embedder failure"));
        }
        let mut v: Vec<f32> = VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        v.push(1.0);
        Ok(v)
    }
}

/// Records every prompt; answers `answer <n>` or fails on demand.
#[derive(Default)]
pub struct ScriptedModel {
    pub calls: Mutex<Vec<Vec<ConversationTurn>>>,
    pub fail: bool,
}

impl ScriptedModel {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<ConversationTurn>> {
        self.calls.lock().expect("lock").clone()
    }
}

impl ChatModel for ScriptedModel {
    fn generate(
        &self,
        messages: &[ConversationTurn],
        _params: &GenerationParams,
    ) -> Result<String, AppError> {
        let mut calls = self.calls.lock().expect("lock");
        calls.push(messages.to_vec());
        if self.fail {
            return Err(
                AppError::new("GENERATION_FAILED", "backend unavailable").with_retryable(true),
            );
        }
        Ok(format!("answer {}", calls.len()))
    }
}

pub fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig {
        persist_directory: root.join("vectorstore"),
        state_directory: root.join("state"),
        upload_directory: root.join("uploads"),
        ..PipelineConfig::default()
    }
}

pub fn pipeline(cfg: PipelineConfig, model: Arc<ScriptedModel>) -> ChatPipeline {
    ChatPipeline::open(
        cfg,
        Arc::new(KeywordEmbedder),
        model,
        ExtractorRegistry::with_defaults(),
    )
    .expect("open pipeline")
}

/// About 900 characters mentioning `keyword` `times` times.
pub fn paragraph(keyword: &str, times: usize) -> String {
    let mut p = format!("{keyword} ").repeat(times);
    while p.len() < 900 {
        p.push_str("lorem ipsum dolor ");
    }
    p.trim_end().to_string()
}
