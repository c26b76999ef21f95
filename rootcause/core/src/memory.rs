//! Incident Memory
//!
//! Startup wiring for the persistence side: picks the incident backend once
//! and binds a [`HealthTracker`] to the key-value store that matches it.

use std::path::Path;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::MemoryConfig;
use crate::project::{ProjectHash, ProjectHasher};
use crate::routing::HealthTracker;
use crate::store::{
    select_backend, BackendKind, IncidentRecord, IncidentStore, Severity, StoreError,
};

/// Minimum confidence a past incident needs to be recalled
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Confidence above which a hypothesis is considered strong
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Default number of similar incidents returned by [`IncidentMemory::recall`]
pub const DEFAULT_SIMILAR_LIMIT: usize = 5;

/// Incident store plus provider health, selected together
pub struct IncidentMemory {
    store: Arc<dyn IncidentStore>,
    health: HealthTracker,
    hasher: ProjectHasher,
    clock: Arc<dyn Clock>,
    degraded: Option<StoreError>,
}

impl IncidentMemory {
    /// Probe the primary backend and fall back to files when it is down
    pub async fn bootstrap(config: &MemoryConfig) -> Self {
        let selected = select_backend(config).await;
        let health = HealthTracker::new(selected.health_kv).with_window(config.health_window);
        Self {
            store: selected.store,
            health,
            hasher: ProjectHasher::new(),
            clock: Arc::new(SystemClock),
            degraded: selected.degraded,
        }
    }

    /// Assemble from parts (tests and embedders)
    pub fn from_parts(store: Arc<dyn IncidentStore>, health: HealthTracker) -> Self {
        Self {
            store,
            health,
            hasher: ProjectHasher::new(),
            clock: Arc::new(SystemClock),
            degraded: None,
        }
    }

    /// Override the project hasher
    #[must_use]
    pub fn with_hasher(mut self, hasher: ProjectHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Override the clock used for new record timestamps
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The selected incident store
    pub fn store(&self) -> Arc<dyn IncidentStore> {
        self.store.clone()
    }

    /// Provider health tracker bound to the matching key-value store
    pub fn health(&self) -> HealthTracker {
        self.health.clone()
    }

    /// Which backend is serving
    pub fn kind(&self) -> BackendKind {
        self.store.kind()
    }

    /// Why the primary backend was rejected at startup, if it was
    pub fn degraded(&self) -> Option<&StoreError> {
        self.degraded.as_ref()
    }

    /// Namespace of a project path
    pub fn project_hash(&self, path: &Path) -> ProjectHash {
        self.hasher.hash(path)
    }

    /// A record for `path` stamped with the current time
    pub fn new_record(
        &self,
        path: &Path,
        hypothesis: impl Into<String>,
        confidence: f64,
        severity: Severity,
    ) -> IncidentRecord {
        IncidentRecord::new(
            self.project_hash(path),
            self.clock.now_secs(),
            hypothesis,
            confidence,
            severity,
        )
    }

    /// Save a finished analysis; returns its incident key
    pub async fn remember(&self, record: &IncidentRecord) -> Result<String, StoreError> {
        let key = self.store.save(record).await?;
        tracing::info!(
            key = %key,
            confidence = record.confidence,
            severity = %record.severity,
            "Incident remembered"
        );
        Ok(key)
    }

    /// Past incidents of a project worth showing before a new analysis
    pub async fn recall(&self, path: &Path) -> Result<Vec<IncidentRecord>, StoreError> {
        self.store
            .find_similar(
                &self.project_hash(path),
                CONFIDENCE_THRESHOLD,
                DEFAULT_SIMILAR_LIMIT,
            )
            .await
    }

    /// Forget everything recorded for a project path
    pub async fn forget(&self, path: &Path) -> Result<usize, StoreError> {
        let removed = self.store.clear_project(&self.project_hash(path)).await?;
        tracing::info!(removed, "Project incident memory cleared");
        Ok(removed)
    }
}

impl std::fmt::Debug for IncidentMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentMemory")
            .field("kind", &self.kind())
            .field("health", &self.health)
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Whether a confidence counts as strong
#[must_use]
pub fn is_high_confidence(confidence: f64) -> bool {
    confidence >= HIGH_CONFIDENCE_THRESHOLD
}
