use std::time::Duration;

use docchat_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{bounded_input, Embedder, MAX_EMBED_INPUT};
use crate::openai::OpenAiClient;

#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: OpenAiClient,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let req = EmbeddingsRequest {
            model,
            input: bounded_input(input, MAX_EMBED_INPUT),
        };
        let resp = self.client.post("/embeddings", self.timeout).send_json(req);

        match resp {
            Ok(r) => {
                let v: EmbeddingsResponse = r.into_json().map_err(|e| {
                    AppError::new("EMBEDDINGS_FAILED", "Failed to decode embeddings response")
                        .with_details(e.to_string())
                })?;
                let embedding = v.data.into_iter().next().map(|d| d.embedding).unwrap_or_default();
                if embedding.is_empty() {
                    return Err(AppError::new("EMBEDDINGS_FAILED", "Embeddings response was empty"));
                }
                Ok(embedding)
            }
            Err(ureq::Error::Status(code, r)) => Err(AppError::new(
                "EMBEDDINGS_FAILED",
                "Embeddings request failed",
            )
            .with_details(format!("status={code}; body={}", r.into_string().unwrap_or_default()))
            .with_retryable(code == 429 || code >= 500)),
            Err(e) => Err(AppError::new("EMBEDDINGS_FAILED", "Failed to call embeddings endpoint")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}
