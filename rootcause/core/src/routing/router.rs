//! LLM Router
//!
//! Calls one of several unreliable providers with deterministic fallback.
//!
//! ```text
//! call(prompt)
//!     |
//!     v
//! sticky provider set? --yes--> attempt it --ok--> return
//!     |                             |
//!     no                          failed: clear sticky
//!     |                             |
//!     v                             v
//! providers by priority (skip the one just tried, skip unavailable)
//!     |
//!     +--> attempt --ok--> make sticky, return
//!     |       |
//!     |     failed: record, next
//!     v
//! AllProvidersExhausted { attempts }
//! ```
//!
//! Every attempt is bounded by the provider's timeout (or the per-call
//! override) and reported to the [`HealthTracker`]. A provider is attempted at
//! most once per call.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::health::{HealthTracker, ProviderHealth};
use crate::config::RoutingConfig;
use crate::provider::{extract_json, Provider, ProviderError};

/// Per-call timeout when a provider does not configure one
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout of the JSON correction re-prompt
pub const DEFAULT_JSON_RETRY_TIMEOUT: Duration = Duration::from_secs(15);

// ============================================================================
// Descriptors and Errors
// ============================================================================

/// A provider registered with a router
#[derive(Clone)]
pub struct ProviderDescriptor {
    provider: Arc<dyn Provider>,
    priority: u32,
    timeout: Duration,
}

impl ProviderDescriptor {
    /// Register `provider` at `priority` (lower is tried first)
    pub fn new(provider: Arc<dyn Provider>, priority: u32) -> Self {
        Self {
            provider,
            priority,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    /// Override the per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Provider name
    pub fn name(&self) -> &str {
        self.provider.name()
    }

    /// Priority (lower first)
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// One failed attempt inside a routed call
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderAttempt {
    /// Provider that was attempted
    pub provider: String,
    /// How it failed
    pub error: ProviderError,
}

/// Routing failures
#[derive(Debug, Error)]
pub enum RouterError {
    /// Every available provider failed (or none was available)
    #[error("all providers exhausted: {}", describe_attempts(.attempts))]
    AllProvidersExhausted {
        /// Failed attempts in the order they were made
        attempts: Vec<ProviderAttempt>,
    },

    /// Two providers were registered under one name
    #[error("provider {0:?} registered twice")]
    DuplicateProvider(String),

    /// The response held no JSON, even after a correction re-prompt
    #[error("could not extract JSON from provider output")]
    UnparseableJson {
        /// The first response text
        raw: String,
    },
}

fn describe_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no provider was available".to_string();
    }
    attempts
        .iter()
        .map(|attempt| format!("{} ({})", attempt.provider, attempt.error))
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Builder
// ============================================================================

/// Collects providers for an [`LlmRouter`]
pub struct RouterBuilder {
    providers: Vec<ProviderDescriptor>,
    health: HealthTracker,
    json_retry_timeout: Duration,
}

impl RouterBuilder {
    /// Add a provider
    #[must_use]
    pub fn provider(mut self, descriptor: ProviderDescriptor) -> Self {
        self.providers.push(descriptor);
        self
    }

    /// Timeout of the JSON correction re-prompt
    #[must_use]
    pub fn json_retry_timeout(mut self, timeout: Duration) -> Self {
        self.json_retry_timeout = timeout;
        self
    }

    /// Validate names and order providers by priority
    pub fn build(mut self) -> Result<LlmRouter, RouterError> {
        for (i, descriptor) in self.providers.iter().enumerate() {
            if self.providers[..i]
                .iter()
                .any(|earlier| earlier.name() == descriptor.name())
            {
                return Err(RouterError::DuplicateProvider(descriptor.name().to_string()));
            }
        }
        // Stable: equal priorities keep registration order
        self.providers.sort_by_key(ProviderDescriptor::priority);

        Ok(LlmRouter {
            providers: self.providers,
            health: self.health,
            json_retry_timeout: self.json_retry_timeout,
            sticky: RwLock::new(None),
        })
    }
}

// ============================================================================
// Router
// ============================================================================

/// Provider router with sticky routing and fallback
pub struct LlmRouter {
    providers: Vec<ProviderDescriptor>,
    health: HealthTracker,
    json_retry_timeout: Duration,
    /// Last provider that answered; tried first next time
    sticky: RwLock<Option<String>>,
}

impl LlmRouter {
    /// Start building a router that reports to `health`
    pub fn builder(health: HealthTracker) -> RouterBuilder {
        RouterBuilder {
            providers: Vec::new(),
            health,
            json_retry_timeout: DEFAULT_JSON_RETRY_TIMEOUT,
        }
    }

    /// Router over the built-in providers described by `config`
    pub fn from_config(config: &RoutingConfig, health: HealthTracker) -> Result<Self, RouterError> {
        let mut builder = Self::builder(health).json_retry_timeout(config.json_retry_timeout);
        for (priority, kind) in (0u32..).zip(config.order()) {
            let settings = config.settings(kind);
            let model = settings.model.as_deref().unwrap_or(kind.default_model());
            let provider = kind.build(
                model,
                settings.api_key.clone(),
                settings.base_url.as_deref(),
                config.params,
            );
            let timeout = settings.timeout.unwrap_or(config.default_timeout);
            builder = builder.provider(ProviderDescriptor::new(provider, priority).with_timeout(timeout));
        }
        builder.build()
    }

    /// Send a prompt, falling back across providers
    ///
    /// `timeout_override` replaces every provider's configured timeout for
    /// this call.
    pub async fn call(
        &self,
        prompt: &str,
        timeout_override: Option<Duration>,
    ) -> Result<String, RouterError> {
        let mut attempts = Vec::new();
        let mut tried: Option<&str> = None;

        let sticky = self.sticky.read().clone();
        if let Some(name) = sticky {
            match self.descriptor(&name) {
                Some(descriptor) => {
                    tried = Some(descriptor.name());
                    match self.attempt(descriptor, prompt, timeout_override).await {
                        Ok(text) => return Ok(text),
                        Err(error) => {
                            self.clear_sticky(&name);
                            attempts.push(ProviderAttempt {
                                provider: name,
                                error,
                            });
                        }
                    }
                }
                None => self.clear_sticky(&name),
            }
        }

        for descriptor in &self.providers {
            if tried == Some(descriptor.name()) {
                continue;
            }
            if !descriptor.provider.is_available().await {
                debug!(provider = descriptor.name(), "Provider unavailable, skipping");
                continue;
            }

            match self.attempt(descriptor, prompt, timeout_override).await {
                Ok(text) => {
                    self.set_sticky(descriptor.name());
                    return Ok(text);
                }
                Err(error) => attempts.push(ProviderAttempt {
                    provider: descriptor.name().to_string(),
                    error,
                }),
            }
        }

        warn!(attempts = attempts.len(), "All providers exhausted");
        Err(RouterError::AllProvidersExhausted { attempts })
    }

    /// Call and parse JSON out of the response
    ///
    /// If the first response holds no JSON, one correction prompt is sent
    /// (bounded by the JSON retry timeout) before giving up.
    pub async fn call_json(&self, prompt: &str) -> Result<serde_json::Value, RouterError> {
        let raw = self.call(prompt, None).await?;
        if let Some(value) = extract_json(&raw) {
            return Ok(value);
        }

        debug!("Response held no JSON, asking for a corrected answer");
        let corrected = match self
            .call(&correction_prompt(&raw), Some(self.json_retry_timeout))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "JSON correction prompt failed");
                return Err(RouterError::UnparseableJson { raw });
            }
        };
        extract_json(&corrected).ok_or(RouterError::UnparseableJson { raw })
    }

    /// Names of providers that are available right now, in priority order
    pub async fn available_providers(&self) -> Vec<String> {
        let mut available = Vec::new();
        for descriptor in &self.providers {
            if descriptor.provider.is_available().await {
                available.push(descriptor.name().to_string());
            }
        }
        available
    }

    /// Registered provider names in priority order
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(ProviderDescriptor::name).collect()
    }

    /// Provider currently tried first, if any
    pub fn sticky(&self) -> Option<String> {
        self.sticky.read().clone()
    }

    /// Health statistics of every registered provider
    ///
    /// Providers whose statistics cannot be read are reported as empty.
    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        let mut report = Vec::with_capacity(self.providers.len());
        for name in self.provider_names() {
            match self.health.snapshot(name).await {
                Ok(health) => report.push(health),
                Err(e) => {
                    warn!(provider = name, error = %e, "Could not read provider health");
                    report.push(ProviderHealth::empty(name));
                }
            }
        }
        report
    }

    /// Health tracker this router reports to
    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|d| d.name() == name)
    }

    /// One bounded attempt, reported to the health tracker
    async fn attempt(
        &self,
        descriptor: &ProviderDescriptor,
        prompt: &str,
        timeout_override: Option<Duration>,
    ) -> Result<String, ProviderError> {
        let name = descriptor.name();
        let timeout = timeout_override.unwrap_or(descriptor.timeout);
        let started = Instant::now();

        let call = descriptor.provider.call(prompt, timeout);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };

        match &result {
            Ok(_) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                debug!(provider = name, latency_ms, "Provider answered");
                if let Err(e) = self.health.record_success(name, latency_ms).await {
                    warn!(provider = name, error = %e, "Failed to record provider success");
                }
            }
            Err(error) => {
                warn!(provider = name, kind = %error.kind(), error = %error, "Provider call failed");
                if let Err(e) = self.health.record_failure(name).await {
                    warn!(provider = name, error = %e, "Failed to record provider failure");
                }
            }
        }
        result
    }

    fn set_sticky(&self, name: &str) {
        let mut sticky = self.sticky.write();
        if sticky.as_deref() != Some(name) {
            info!(provider = name, previous = ?sticky.as_deref(), "Sticky provider changed");
            *sticky = Some(name.to_string());
        }
    }

    /// Clear the sticky pointer if it still names `name`
    fn clear_sticky(&self, name: &str) {
        let mut sticky = self.sticky.write();
        if sticky.as_deref() == Some(name) {
            info!(provider = name, "Sticky provider cleared");
            *sticky = None;
        }
    }
}

impl fmt::Debug for LlmRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmRouter")
            .field("providers", &self.providers)
            .field("sticky", &*self.sticky.read())
            .finish_non_exhaustive()
    }
}

fn correction_prompt(raw: &str) -> String {
    format!(
        "The following output was NOT valid JSON.\n\n\
         Return ONLY valid JSON.\nNo explanation.\nNo markdown.\n\n\
         INVALID OUTPUT:\n{raw}\n"
    )
}
