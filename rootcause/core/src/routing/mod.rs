//! Provider Routing
//!
//! - [`router`]: ordered fallback across providers with sticky routing
//! - [`health`]: rolling per-provider success/latency statistics
//! - [`test_utils`]: scripted providers for tests

pub mod health;
pub mod router;
pub mod test_utils;

pub use health::{HealthTracker, ProviderHealth, DEFAULT_HEALTH_WINDOW};
pub use router::{
    LlmRouter, ProviderAttempt, ProviderDescriptor, RouterBuilder, RouterError,
    DEFAULT_JSON_RETRY_TIMEOUT, DEFAULT_PROVIDER_TIMEOUT,
};
