//! Incident Memory Store
//!
//! Persists analysis outcomes per project namespace and answers two lookups:
//! confidence-ranked similarity and severity membership. Two backends share
//! one contract:
//!
//! | Backend | Storage | Expiration | Indexes |
//! |---|---|---|---|
//! | [`PrimaryStore`] | [`KvStore`](crate::kv::KvStore) (Redis in production) | native TTL on all three keys | sorted set + sets |
//! | [`FileStore`] | one JSON document per project | expire-on-read, compact-on-save | rebuilt per query |
//!
//! [`select_backend`] probes the primary at startup and degrades to the file
//! backend for the rest of the process if it cannot be reached.

pub mod file;
pub mod index;
pub mod primary;
pub mod record;
mod select;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::project::ProjectHash;

pub use self::file::FileStore;
pub use self::primary::PrimaryStore;
pub use self::record::{FixSuggestion, IncidentRecord, Severity};
pub use self::select::{select_backend, SelectedBackend};

/// Default record retention: 30 days
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Errors from incident store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached (startup probe only)
    #[error("incident store backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The record and its indexes were not written
    #[error("failed to save incident {key}: {reason}")]
    SaveFailed {
        /// Incident key of the rejected record
        key: String,
        /// What went wrong
        reason: String,
    },

    /// A lookup could not be answered
    #[error("incident query failed: {0}")]
    QueryFailed(String),

    /// The record violates a stored-record invariant
    #[error("invalid incident record: {0}")]
    InvalidRecord(String),
}

/// Which backend is serving the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Remote key-value store with native expiration
    Primary,
    /// Local JSON files
    File,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::File => f.write_str("file"),
        }
    }
}

/// Save/query contract every backend implements
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Persist a record and both of its index entries as one unit
    ///
    /// Returns the incident key. A second record for the same project and
    /// second is rejected with [`StoreError::SaveFailed`]; saved records are
    /// never overwritten.
    async fn save(&self, record: &IncidentRecord) -> Result<String, StoreError>;

    /// Live records with `confidence >= min_confidence`, highest first, at most `limit`
    async fn find_similar(
        &self,
        project: &ProjectHash,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<IncidentRecord>, StoreError>;

    /// Live records of one severity tier, in no particular order
    async fn find_by_severity(
        &self,
        project: &ProjectHash,
        severity: Severity,
    ) -> Result<Vec<IncidentRecord>, StoreError>;

    /// Forget every record of a project; returns how many records were removed
    async fn clear_project(&self, project: &ProjectHash) -> Result<usize, StoreError>;

    /// Whether the backend currently answers
    async fn health_check(&self) -> bool;

    /// Which backend this is
    fn kind(&self) -> BackendKind;
}

/// Retention expressed in whole seconds (at least one)
pub(crate) fn retention_secs(retention: Duration) -> i64 {
    i64::try_from(retention.as_secs().max(1)).unwrap_or(i64::MAX)
}

/// Time a record has left before it expires, counted from its own timestamp
///
/// A record already past retention is rejected: saving it would succeed yet
/// leave nothing readable.
pub(crate) fn remaining_retention(
    record: &IncidentRecord,
    now_secs: i64,
    retention: Duration,
) -> Result<Duration, StoreError> {
    let retention = retention_secs(retention);
    if record.is_expired(now_secs, retention) {
        return Err(StoreError::InvalidRecord(format!(
            "timestamp {} is already past the {retention}s retention window",
            record.timestamp
        )));
    }
    let remaining = record
        .timestamp
        .saturating_add(retention)
        .saturating_sub(now_secs);
    Ok(Duration::from_secs(u64::try_from(remaining).unwrap_or(1)))
}
