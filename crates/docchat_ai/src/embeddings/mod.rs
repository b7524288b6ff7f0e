use docchat_core::error::AppError;

pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;
}

pub mod ollama_embed;
pub mod openai_embed;

/// Longest input (in bytes) sent to an embeddings endpoint.
pub(crate) const MAX_EMBED_INPUT: usize = 12_000;

/// Cut `input` to at most `max` bytes without splitting a UTF-8 sequence.
pub(crate) fn bounded_input(input: &str, max: usize) -> &str {
    if input.len() <= max {
        return input;
    }
    let mut end = max;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}
