//! Ollama Provider
//!
//! Local inference server. Uses the non-streaming `/api/generate` endpoint;
//! availability is a quick `/api/tags` probe.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::http::{client, send_json, text_at};
use super::traits::{GenerationParams, Provider, ProviderError};

/// Default server address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default model
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

/// Time budget of the availability probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ollama client
#[derive(Clone, Debug)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    params: GenerationParams,
    http_client: reqwest::Client,
}

impl OllamaProvider {
    /// Provider for the server at `base_url`
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            params: GenerationParams::default(),
            http_client: client(),
        }
    }

    /// Override sampling parameters
    #[must_use]
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Model requests are sent to
    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_MODEL)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.params.temperature,
                "num_predict": self.params.max_tokens,
            },
        });
        let response = send_json(self.http_client.post(self.generate_url()), &body, timeout).await?;
        text_at(&response, "/response")
    }
}
