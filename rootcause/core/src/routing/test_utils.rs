//! Routing Test Utilities
//!
//! A scripted [`Provider`] for exercising fallback without network calls.
//! Each provider replays a queue of outcomes (then repeats a default) and
//! records every prompt it was sent.
//!
//! ```ignore
//! let a = ScriptedProvider::new("a").then_fail(ProviderError::Transport("down".into()));
//! let b = ScriptedProvider::new("b").then_reply("ok");
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::kv::MemoryKv;
use crate::provider::{Provider, ProviderError};

use super::health::HealthTracker;

// ============================================================================
// Scripted Outcomes
// ============================================================================

/// What a scripted call does
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Return this text
    Reply(String),
    /// Fail with this error
    Fail(ProviderError),
    /// Never answer (the router's timeout must fire)
    Hang,
}

// ============================================================================
// Scripted Provider
// ============================================================================

/// Provider replaying scripted outcomes
pub struct ScriptedProvider {
    name: String,
    available: AtomicBool,
    script: Mutex<VecDeque<Outcome>>,
    fallback: Mutex<Outcome>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    /// Available provider that fails every call until scripted
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Outcome::Fail(ProviderError::Transport(
                "unscripted call".to_string(),
            ))),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue a reply
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(Outcome::Reply(text.into()));
        self
    }

    /// Queue a failure
    pub fn then_fail(self, error: ProviderError) -> Self {
        self.script.lock().push_back(Outcome::Fail(error));
        self
    }

    /// Queue a call that never answers
    pub fn then_hang(self) -> Self {
        self.script.lock().push_back(Outcome::Hang);
        self
    }

    /// Outcome once the queue is empty
    pub fn otherwise(self, outcome: Outcome) -> Self {
        *self.fallback.lock() = outcome;
        self
    }

    /// Mark as unavailable
    pub fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    /// Flip availability at runtime
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Wrap in an `Arc`
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn call(&self, prompt: &str, _timeout: Duration) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone());

        match outcome {
            Outcome::Reply(text) => Ok(text),
            Outcome::Fail(error) => Err(error),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                Err(ProviderError::Transport("unreachable".to_string()))
            }
        }
    }
}

/// Health tracker over a fresh in-process store
pub fn memory_health() -> HealthTracker {
    HealthTracker::new(Arc::new(MemoryKv::new()))
}
