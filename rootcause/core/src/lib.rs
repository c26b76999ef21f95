//! Rootcause Core - Provider Routing and Incident Memory
//!
//! Two independent subsystems used by an automated root-cause analysis
//! workflow:
//!
//! ```text
//! workflow step
//!      │
//!      ▼
//! ┌──────────────────────────────┐      ┌───────────────────────────┐
//! │          LlmRouter           │─────▶│      HealthTracker        │
//! │ sticky provider, fallback in │      │ llm:health:{provider}     │
//! │ priority order, per-call     │      │ rolling window            │
//! │ timeouts                     │      └─────────────┬─────────────┘
//! └──────────────┬───────────────┘                    │
//!                │ text + evidence                    │
//!                ▼                                    ▼
//!        IncidentRecord  ──save──▶  IncidentStore ─── KvStore
//!                                   (primary / file)  (redis / memory)
//! ```
//!
//! # Module Overview
//!
//! - [`provider`]: inference provider trait and the built-in HTTP providers
//! - [`routing`]: the router and provider health statistics
//! - [`store`]: incident records, the store contract and its two backends
//! - [`kv`]: key-value layer shared by the primary store and health tracking
//! - [`memory`]: startup wiring of store plus health tracker
//! - [`project`]: project path namespacing
//! - [`config`]: TOML + environment configuration
//! - [`clock`]: wall clock abstraction for expiration
//!
//! # Quick Start
//!
//! ```ignore
//! use rootcause_core::{load_config, IncidentMemory, LlmRouter, Severity};
//!
//! let config = load_config()?;
//! let memory = IncidentMemory::bootstrap(&config.memory).await;
//! let router = LlmRouter::from_config(&config.routing, memory.health())?;
//!
//! let past = memory.recall(project).await?;
//! let answer = router.call(&prompt, None).await?;
//! let record = memory.new_record(project, answer, 0.82, Severity::P1);
//! memory.remember(&record).await?;
//! ```

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod kv;
pub mod memory;
pub mod project;
pub mod provider;
pub mod routing;
pub mod store;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::{
    IncidentMemory, CONFIDENCE_THRESHOLD, DEFAULT_SIMILAR_LIMIT, HIGH_CONFIDENCE_THRESHOLD,
};
pub use project::{ProjectHash, ProjectHasher};

// Provider exports
pub use provider::{extract_json, GenerationParams, Provider, ProviderError, ProviderKind};

// Routing exports
pub use routing::{
    HealthTracker, LlmRouter, ProviderAttempt, ProviderDescriptor, ProviderHealth, RouterError,
};

// Store exports
pub use store::{
    select_backend, BackendKind, FileStore, FixSuggestion, IncidentRecord, IncidentStore,
    PrimaryStore, Severity, StoreError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    MemoryConfig, RootcauseConfig, RootcauseToml, RoutingConfig,
};
