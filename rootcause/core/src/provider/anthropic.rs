//! Anthropic Messages API provider

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::http::{client, send_json, text_at};
use super::traits::{GenerationParams, Provider, ProviderError};

/// Public endpoint root
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";

/// Default model
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-20241022";

const API_VERSION: &str = "2023-06-01";

/// Anthropic client
#[derive(Clone)]
pub struct AnthropicProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    params: GenerationParams,
    http_client: reqwest::Client,
}

impl AnthropicProvider {
    /// Provider against the public endpoint
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_ANTHROPIC_URL.to_string(),
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

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Transport("ANTHROPIC_API_KEY not set".to_string()))?;

        let body = json!({
            "model": self.model,
            "max_tokens": self.params.max_tokens,
            "temperature": self.params.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .http_client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION);
        let response = send_json(request, &body, timeout).await?;
        text_at(&response, "/content/0/text")
    }
}
