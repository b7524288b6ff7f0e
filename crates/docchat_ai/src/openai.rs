use docchat_core::error::AppError;

/// Connection settings for an OpenAI-compatible HTTP API.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            return Err(AppError::new("CONFIG_INVALID", "OpenAI base URL must be http(s)")
                .with_details(format!("base_url={base_url}")));
        }
        if api_key.trim().is_empty() {
            return Err(AppError::new(
                "CONFIG_MISSING_API_KEY",
                "OPENAI_API_KEY is required for the openai provider",
            ));
        }
        Ok(Self {
            base_url,
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn post(&self, path: &str, timeout: std::time::Duration) -> ureq::Request {
        ureq::post(&format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .set("Authorization", &format!("Bearer {}", self.api_key))
    }
}
