//! File Incident Backend
//!
//! Used when the primary store is unreachable. Each project namespace is one
//! JSON array at `{data_dir}/{project_hash}.json`. Writers hold a per-project
//! async lock and replace the document through a synced temp file and a rename,
//! so a reader sees either the old or the new document.
//!
//! There are no persistent indexes: every query scans the document, drops
//! records past retention and ranks the survivors with the same
//! [`ScoredIndex`]/[`MembershipIndex`] types the key-value store uses.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::index::{MembershipIndex, ScoredIndex};
use super::record::{IncidentRecord, Severity};
use super::{
    remaining_retention, retention_secs, BackendKind, IncidentStore, StoreError,
    DEFAULT_RETENTION,
};
use crate::clock::{Clock, SystemClock};
use crate::project::ProjectHash;

/// Local JSON-file incident store
pub struct FileStore {
    data_dir: PathBuf,
    retention: Duration,
    clock: Arc<dyn Clock>,
    locks: DashMap<ProjectHash, Arc<Mutex<()>>>,
}

impl FileStore {
    /// Store rooted at `data_dir` (created on first save)
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            retention: DEFAULT_RETENTION,
            clock: Arc::new(SystemClock),
            locks: DashMap::new(),
        }
    }

    /// Override retention
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Override the clock used for expiration
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Directory holding the project documents
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn document_path(&self, project: &ProjectHash) -> PathBuf {
        self.data_dir.join(format!("{project}.json"))
    }

    fn lock_for(&self, project: &ProjectHash) -> Arc<Mutex<()>> {
        self.locks
            .entry(project.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Every record in a project document, expired ones included
    async fn read_document(&self, project: &ProjectHash) -> Result<Vec<IncidentRecord>, String> {
        let path = self.document_path(project);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(format!("read {}: {e}", path.display())),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let records: Vec<IncidentRecord> = serde_json::from_str(&raw)
            .map_err(|e| format!("parse {}: {e}", path.display()))?;
        Ok(records
            .into_iter()
            .filter(|record| &record.project_hash == project)
            .collect())
    }

    /// Replace a project document atomically
    async fn write_document(
        &self,
        project: &ProjectHash,
        records: &[IncidentRecord],
    ) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| format!("create {}: {e}", self.data_dir.display()))?;

        let body = serde_json::to_vec_pretty(records).map_err(|e| e.to_string())?;
        let target = self.document_path(project);
        let temp = self
            .data_dir
            .join(format!(".{project}.{}.tmp", uuid::Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            file.write_all(&body).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &target).await
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                debug!(path = %temp.display(), error = %cleanup, "Temp file cleanup failed");
            }
            return Err(format!("write {}: {e}", target.display()));
        }
        Ok(())
    }

    /// Live records of a project, keyed by incident key
    async fn live_records(
        &self,
        project: &ProjectHash,
    ) -> Result<HashMap<String, IncidentRecord>, StoreError> {
        let now = self.clock.now_secs();
        let retention = retention_secs(self.retention);
        let records = self
            .read_document(project)
            .await
            .map_err(StoreError::QueryFailed)?;
        Ok(records
            .into_iter()
            .filter(|record| !record.is_expired(now, retention))
            .map(|record| (record.key(), record))
            .collect())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("data_dir", &self.data_dir)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IncidentStore for FileStore {
    async fn save(&self, record: &IncidentRecord) -> Result<String, StoreError> {
        record.validate().map_err(StoreError::InvalidRecord)?;
        remaining_retention(record, self.clock.now_secs(), self.retention)?;
        let key = record.key();
        let save_failed = |reason: String| StoreError::SaveFailed {
            key: key.clone(),
            reason,
        };

        let lock = self.lock_for(&record.project_hash);
        let _guard = lock.lock().await;

        let now = self.clock.now_secs();
        let retention = retention_secs(self.retention);
        let mut records = self
            .read_document(&record.project_hash)
            .await
            .map_err(save_failed)?;

        let before = records.len();
        records.retain(|existing| !existing.is_expired(now, retention));
        let compacted = before - records.len();

        if records.iter().any(|existing| existing.key() == key) {
            return Err(save_failed(
                "an incident with this key already exists".to_string(),
            ));
        }

        records.push(record.clone());
        self.write_document(&record.project_hash, &records)
            .await
            .map_err(save_failed)?;

        if compacted > 0 {
            debug!(project = %record.project_hash, compacted, "Dropped expired incidents");
        }
        info!(key = %key, severity = %record.severity, "Saved incident to file store");
        Ok(key)
    }

    async fn find_similar(
        &self,
        project: &ProjectHash,
        min_confidence: f64,
        limit: usize,
    ) -> Result<Vec<IncidentRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut records = self.live_records(project).await?;

        let mut index = ScoredIndex::new();
        for (key, record) in &records {
            index.insert(key.clone(), record.confidence);
        }
        let ranked: Vec<String> = index
            .range_desc(min_confidence, f64::INFINITY, 0, limit)
            .into_iter()
            .map(str::to_string)
            .collect();

        Ok(ranked
            .iter()
            .filter_map(|key| records.remove(key))
            .collect())
    }

    async fn find_by_severity(
        &self,
        project: &ProjectHash,
        severity: Severity,
    ) -> Result<Vec<IncidentRecord>, StoreError> {
        let records = self.live_records(project).await?;

        let mut index = MembershipIndex::new();
        for (key, record) in &records {
            if record.severity == severity {
                index.insert(key.clone());
            }
        }

        Ok(records
            .into_iter()
            .filter(|(key, _)| index.contains(key))
            .map(|(_, record)| record)
            .collect())
    }

    async fn clear_project(&self, project: &ProjectHash) -> Result<usize, StoreError> {
        let lock = self.lock_for(project);
        let _guard = lock.lock().await;

        let removed = self.live_records(project).await?.len();
        let path = self.document_path(project);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::QueryFailed(format!(
                    "remove {}: {e}",
                    path.display()
                )))
            }
        }

        info!(project = %project, removed, "Cleared project incident memory");
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        match tokio::fs::create_dir_all(&self.data_dir).await {
            Ok(()) => true,
            Err(e) => {
                warn!(path = %self.data_dir.display(), error = %e, "Incident data directory unusable");
                false
            }
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::File
    }
}
