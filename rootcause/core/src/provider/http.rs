//! Shared HTTP plumbing for hosted providers
//!
//! Maps transport outcomes onto [`ProviderError`]: client timeouts become
//! `Timeout`, connection failures and non-success statuses (429 included)
//! become `Transport`, undecodable bodies and missing fields become
//! `MalformedResponse`.

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;

use super::traits::ProviderError;

/// Longest provider error body kept in an error message
const MAX_ERROR_BODY: usize = 300;

/// Shared HTTP client for all providers
pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("rootcause/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Send a JSON request and decode a JSON response
pub(crate) async fn send_json(
    request: RequestBuilder,
    body: &Value,
    timeout: Duration,
) -> Result<Value, ProviderError> {
    let response = request
        .json(body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify(e, timeout))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::Transport("rate limited".to_string()));
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::Transport(format!(
            "HTTP {status}: {}",
            error_message(&text)
        )));
    }

    let text = response.text().await.map_err(|e| classify(e, timeout))?;
    serde_json::from_str(&text)
        .map_err(|e| ProviderError::MalformedResponse(format!("body is not JSON: {e}")))
}

/// String at a JSON pointer, or `MalformedResponse`
pub(crate) fn text_at(value: &Value, pointer: &str) -> Result<String, ProviderError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::MalformedResponse(format!("missing {pointer}")))
}

fn classify(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        // URLs can carry API keys in the query string
        ProviderError::Transport(error.without_url().to_string())
    }
}

/// Best human-readable message from an error body
fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    let message = from_json.unwrap_or_else(|| body.trim().to_string());
    if message.chars().count() > MAX_ERROR_BODY {
        let truncated: String = message.chars().take(MAX_ERROR_BODY).collect();
        format!("{truncated}...")
    } else {
        message
    }
}
