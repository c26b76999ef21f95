//! HuggingFace Inference API provider

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{client, send_json};
use super::traits::{GenerationParams, Provider, ProviderError};

/// Public endpoint root
pub const DEFAULT_HUGGINGFACE_URL: &str = "https://api-inference.huggingface.co/models";

/// Default model
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";

/// HuggingFace client
#[derive(Clone)]
pub struct HuggingFaceProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    params: GenerationParams,
    http_client: reqwest::Client,
}

impl HuggingFaceProvider {
    /// Provider against the public endpoint
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_HUGGINGFACE_URL.to_string(),
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

impl std::fmt::Debug for HuggingFaceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceProvider")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// The API answers with either `[{generated_text}]` or `{generated_text}`
fn generated_text(response: &Value) -> Result<String, ProviderError> {
    let item = match response {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    item.and_then(|v| v.get("generated_text"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MalformedResponse("missing generated_text".to_string()))
}

#[async_trait]
impl Provider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Transport("HUGGINGFACE_API_KEY not set".to_string()))?;

        let body = json!({
            "inputs": prompt,
            "parameters": {
                "temperature": self.params.temperature,
                "max_new_tokens": self.params.max_tokens,
                "return_full_text": false,
            },
        });
        let request = self
            .http_client
            .post(format!("{}/{}", self.base_url, self.model))
            .bearer_auth(api_key);
        let response = send_json(request, &body, timeout).await?;
        generated_text(&response)
    }
}
