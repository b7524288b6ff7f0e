use docchat_core::domain::ConversationTurn;
use docchat_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{non_empty, to_wire, ChatModel, GenerationParams, WireMessage};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaChat {
    client: OllamaClient,
}

impl OllamaChat {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: WireMessage,
}

impl ChatModel for OllamaChat {
    fn generate(
        &self,
        messages: &[ConversationTurn],
        params: &GenerationParams,
    ) -> Result<String, AppError> {
        let url = format!("{}/api/chat", self.client.base_url());
        let req = ChatRequest {
            model: &params.model,
            messages: to_wire(messages),
            stream: false,
            options: ChatOptions {
                temperature: params.temperature,
                num_predict: params.max_tokens,
            },
        };

        match ureq::post(&url).timeout(params.timeout).send_json(req) {
            Ok(r) => {
                let v: ChatResponse = r.into_json().map_err(|e| {
                    AppError::new("GENERATION_FAILED", "Failed to decode chat response")
                        .with_details(e.to_string())
                })?;
                non_empty(v.message.content)
            }
            Err(ureq::Error::Status(code, _)) => Err(AppError::new(
                "GENERATION_FAILED",
                "Chat request failed",
            )
            .with_details(format!("status={code}"))
            .with_retryable(code >= 500)),
            Err(e) => Err(AppError::new("GENERATION_FAILED", "Failed to call chat endpoint")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}
