//! Provider Traits
//!
//! The capability every inference backend exposes to the router. Providers
//! differ in transport, auth and payload shape; the router only sees a name,
//! an availability predicate and a prompt-in/text-out call.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Default completion budget
pub const DEFAULT_MAX_TOKENS: u32 = 2000;

/// Why a single provider call failed
///
/// Routing treats every variant the same way (move on to the next provider);
/// they stay distinct so callers can report what happened.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ProviderError {
    /// No answer within the call's time budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, HTTP status or rate-limit failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered but the body was not usable
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Failure class without the detail
    #[must_use]
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::Timeout(_) => ProviderErrorKind::Timeout,
            Self::Transport(_) => ProviderErrorKind::Transport,
            Self::MalformedResponse(_) => ProviderErrorKind::MalformedResponse,
        }
    }
}

/// Failure class of a [`ProviderError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// See [`ProviderError::Timeout`]
    Timeout,
    /// See [`ProviderError::Transport`]
    Transport,
    /// See [`ProviderError::MalformedResponse`]
    MalformedResponse,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::MalformedResponse => write!(f, "malformed"),
        }
    }
}

/// Sampling parameters sent with every request
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    /// Temperature (0.0-1.0)
    pub temperature: f32,
    /// Maximum tokens in the completion
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// An inference backend
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique name used for routing, health keys and logs
    fn name(&self) -> &str;

    /// Whether the provider can be attempted right now
    ///
    /// Cheap checks only (API key present, local server answering). An
    /// unavailable provider is skipped without counting as a failure.
    async fn is_available(&self) -> bool;

    /// Send a prompt and return the completion text
    ///
    /// `timeout` bounds the whole call. The router enforces it as well.
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, ProviderError>;
}
