//! OpenRouter provider (OpenAI-compatible chat completions)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::http::{client, send_json, text_at};
use super::traits::{GenerationParams, Provider, ProviderError};

/// Public endpoint root
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";

/// Default model (free-tier router)
pub const DEFAULT_OPENROUTER_MODEL: &str = "openrouter/free";

/// OpenRouter client
#[derive(Clone)]
pub struct OpenRouterProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    params: GenerationParams,
    http_client: reqwest::Client,
}

impl OpenRouterProvider {
    /// Provider against the public endpoint
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OPENROUTER_URL.to_string(),
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

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Transport("OPENROUTER_API_KEY not set".to_string()))?;

        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.params.temperature,
            "max_tokens": self.params.max_tokens,
        });
        let request = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("X-Title", "rootcause");
        let response = send_json(request, &body, timeout).await?;
        text_at(&response, "/choices/0/message/content")
    }
}
