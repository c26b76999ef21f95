//! Startup backend selection

use std::sync::Arc;

use tracing::{info, warn};

use super::{BackendKind, FileStore, IncidentStore, PrimaryStore, StoreError};
use crate::config::MemoryConfig;
use crate::kv::{KvStore, MemoryKv, RedisKv};

/// The backend chosen at startup
///
/// `health_kv` is the key-value store provider health should be tracked in:
/// the primary's store when it is up, an in-process one otherwise.
pub struct SelectedBackend {
    /// Incident store for the rest of the process
    pub store: Arc<dyn IncidentStore>,
    /// Key-value store for provider health
    pub health_kv: Arc<dyn KvStore>,
    /// Why the primary was rejected, if it was
    pub degraded: Option<StoreError>,
}

impl SelectedBackend {
    /// Which backend won
    pub fn kind(&self) -> BackendKind {
        self.store.kind()
    }
}

impl std::fmt::Debug for SelectedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedBackend")
            .field("kind", &self.kind())
            .field("health_kv", &self.health_kv.name())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Probe the primary store and fall back to files if it does not answer
///
/// The decision holds for the life of the process; a primary that comes back
/// later is not picked up.
pub async fn select_backend(config: &MemoryConfig) -> SelectedBackend {
    match connect_primary(config).await {
        Ok((store, kv)) => {
            info!(retention_days = config.retention_days(), "Incident memory using primary store");
            SelectedBackend {
                store,
                health_kv: kv,
                degraded: None,
            }
        }
        Err(e) => {
            warn!(
                error = %e,
                data_dir = %config.data_dir.display(),
                "Primary incident store unavailable, degrading to file store"
            );
            SelectedBackend {
                store: Arc::new(
                    FileStore::new(config.data_dir.clone()).with_retention(config.retention),
                ),
                health_kv: Arc::new(MemoryKv::new()),
                degraded: Some(e),
            }
        }
    }
}

async fn connect_primary(
    config: &MemoryConfig,
) -> Result<(Arc<dyn IncidentStore>, Arc<dyn KvStore>), StoreError> {
    let kv = RedisKv::connect(&config.redis_url, config.connect_timeout)
        .await
        .map_err(|e| StoreError::BackendUnavailable(e.to_string()))?;
    let kv = Arc::new(kv);

    let store = PrimaryStore::new(kv.clone()).with_retention(config.retention);
    if !store.health_check().await {
        return Err(StoreError::BackendUnavailable(
            "health check did not answer".to_string(),
        ));
    }
    let store: Arc<dyn IncidentStore> = Arc::new(store);
    let kv: Arc<dyn KvStore> = kv;
    Ok((store, kv))
}
