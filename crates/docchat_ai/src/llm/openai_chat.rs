use docchat_core::domain::ConversationTurn;
use docchat_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{non_empty, to_wire, ChatModel, GenerationParams, WireMessage};
use crate::openai::OpenAiClient;

#[derive(Debug, Clone)]
pub struct OpenAiChat {
    client: OpenAiClient,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatModel for OpenAiChat {
    fn generate(
        &self,
        messages: &[ConversationTurn],
        params: &GenerationParams,
    ) -> Result<String, AppError> {
        let req = CompletionRequest {
            model: &params.model,
            messages: to_wire(messages),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        match self.client.post("/chat/completions", params.timeout).send_json(req) {
            Ok(r) => {
                let v: CompletionResponse = r.into_json().map_err(|e| {
                    AppError::new("GENERATION_FAILED", "Failed to decode completion response")
                        .with_details(e.to_string())
                })?;
                let text = v
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                non_empty(text)
            }
            Err(ureq::Error::Status(code, r)) => {
                let body = r.into_string().unwrap_or_default();
                Err(
                    AppError::new("GENERATION_FAILED", "Completion request failed")
                        .with_details(format!("status={code}; body={body}"))
                        .with_retryable(code == 429 || code >= 500),
                )
            }
            Err(e) => Err(AppError::new("GENERATION_FAILED", "Failed to call completion endpoint")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}
