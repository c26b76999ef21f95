//! Google Gemini provider (`generateContent` REST API)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::http::{client, send_json, text_at};
use super::traits::{GenerationParams, Provider, ProviderError};

/// Public endpoint root
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Gemini client; available when an API key is configured
#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    params: GenerationParams,
    http_client: reqwest::Client,
}

impl GeminiProvider {
    /// Provider against the public endpoint
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
            params: GenerationParams::default(),
            http_client: client(),
        }
    }

    /// Point at another endpoint root
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override sampling parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Transport("GOOGLE_API_KEY not set".to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.params.temperature,
                "maxOutputTokens": self.params.max_tokens,
            },
        });
        let request = self.http_client.post(url).query(&[("key", api_key)]);
        let response = send_json(request, &body, timeout).await?;
        text_at(&response, "/candidates/0/content/parts/0/text")
    }
}
