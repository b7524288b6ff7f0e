use std::time::Duration;

use docchat_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{bounded_input, Embedder, MAX_EMBED_INPUT};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let prompt = bounded_input(input, MAX_EMBED_INPUT);

        let url = format!("{}/api/embeddings", self.client.base_url());
        let req = EmbeddingsRequest { model, prompt };
        let resp = ureq::post(&url).timeout(self.timeout).send_json(req);

        match resp {
            Ok(r) => {
                let v: EmbeddingsResponse = r.into_json().map_err(|e| {
                    AppError::new("EMBEDDINGS_FAILED", "Failed to decode embeddings response")
                        .with_details(e.to_string())
                })?;
                if v.embedding.is_empty() {
                    return Err(AppError::new("EMBEDDINGS_FAILED", "Embeddings response was empty"));
                }
                Ok(v.embedding)
            }
            Err(ureq::Error::Status(code, _)) => Err(AppError::new(
                "EMBEDDINGS_FAILED",
                "Embeddings request failed",
            )
            .with_details(format!("status={code}"))
            .with_retryable(code >= 500)),
            Err(e) => Err(AppError::new("EMBEDDINGS_FAILED", "Failed to call embeddings endpoint")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}
