use std::time::Duration;

use docchat_core::domain::ConversationTurn;
use docchat_core::error::AppError;

/// Per-call generation settings taken from the request's config snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Opaque text-generation backend: ordered messages in, completion text out.
pub trait ChatModel: Send + Sync {
    fn generate(
        &self,
        messages: &[ConversationTurn],
        params: &GenerationParams,
    ) -> Result<String, AppError>;
}

pub mod ollama_chat;
pub mod openai_chat;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct WireMessage {
    pub role: String,
    pub content: String,
}

pub(crate) fn to_wire(messages: &[ConversationTurn]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        })
        .collect()
}

pub(crate) fn non_empty(text: String) -> Result<String, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::new("GENERATION_EMPTY", "Generation response was empty"));
    }
    Ok(text)
}
