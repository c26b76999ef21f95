//! Provider Health Tracking
//!
//! Rolling per-provider counters kept in a [`KvStore`] under
//! `llm:health:{provider}`. Each update is one atomic merge in the store and
//! pushes the key's expiration out to the window, so a provider that stops
//! being called ages out of the statistics.
//!
//! Routing does not consult these numbers; they exist for observability.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::kv::{health_key, HealthEvent, KvError, KvStore};

/// Default rolling window
pub const DEFAULT_HEALTH_WINDOW: Duration = Duration::from_secs(3600);

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time health of one provider
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderHealth {
    /// Provider name
    pub name: String,
    /// Successful calls in the window
    pub success_count: u64,
    /// Failed calls in the window
    pub failure_count: u64,
    /// Mean latency of successful calls, milliseconds
    pub avg_latency_ms: f64,
    /// Unix seconds of the last success
    pub last_success: Option<i64>,
}

impl ProviderHealth {
    /// All-zero statistics for a provider with no recorded calls
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success_count: 0,
            failure_count: 0,
            avg_latency_ms: 0.0,
            last_success: None,
        }
    }

    /// Total calls in the window
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Fraction of successful calls (1.0 with no data)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        match self.total_calls() {
            0 => 1.0,
            total => self.success_count as f64 / total as f64,
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Records call outcomes per provider
#[derive(Clone)]
pub struct HealthTracker {
    kv: Arc<dyn KvStore>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl HealthTracker {
    /// Tracker over `kv` with the default one hour window
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            window: DEFAULT_HEALTH_WINDOW,
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the rolling window
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Override the clock used for `last_success`
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Rolling window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a success and fold its latency into the running mean
    pub async fn record_success(&self, provider: &str, latency_ms: f64) -> Result<(), KvError> {
        let event = HealthEvent::Success {
            latency_ms,
            at_secs: self.clock.now_secs(),
        };
        self.kv
            .merge_health(&health_key(provider), &event, self.window)
            .await
    }

    /// Count a failure
    pub async fn record_failure(&self, provider: &str) -> Result<(), KvError> {
        self.kv
            .merge_health(&health_key(provider), &HealthEvent::Failure, self.window)
            .await
    }

    /// Current statistics (all zero when nothing is recorded)
    pub async fn snapshot(&self, provider: &str) -> Result<ProviderHealth, KvError> {
        let counters = self.kv.read_health(&health_key(provider)).await?;
        Ok(match counters {
            Some(c) => ProviderHealth {
                name: provider.to_string(),
                success_count: c.success_count,
                failure_count: c.failure_count,
                avg_latency_ms: c.avg_latency_ms,
                last_success: c.last_success,
            },
            None => ProviderHealth::empty(provider),
        })
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("kv", &self.kv.name())
            .field("window", &self.window)
            .finish()
    }
}
