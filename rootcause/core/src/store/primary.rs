//! Primary Incident Backend
//!
//! Records live under the persistence key layout:
//!
//! ```text
//! incident:{hash}:{ts}               JSON record         TTL = retention
//! incidents:similar:{hash}           zset (confidence)   TTL = retention
//! incidents:severity:{hash}:{P0..P3} set of keys         TTL = retention
//! ```
//!
//! All three keys are written in one atomic step. The record's TTL runs from
//! its own timestamp, so a back-dated record expires when it would have on
//! the file backend. Index expiry is only ever extended, so an index can
//! outlive some of its members; queries re-read every candidate and skip
//! (and prune) members whose primary entry is gone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::record::{severity_key, similarity_key, IncidentRecord, Severity};
use super::{remaining_retention, BackendKind, IncidentStore, StoreError, DEFAULT_RETENTION};
use crate::clock::{Clock, SystemClock};
use crate::kv::{IndexedWrite, KvError, KvStore, WriteOutcome};
use crate::project::ProjectHash;

/// Candidates fetched per similarity page
const PAGE_SIZE: usize = 32;

/// Incident store on a [`KvStore`]
pub struct PrimaryStore<K: KvStore + ?Sized> {
    kv: Arc<K>,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: KvStore + ?Sized> PrimaryStore<K> {
    /// Store with the default 30 day retention
    pub fn new(kv: Arc<K>) -> Self {
        Self {
            kv,
            retention: DEFAULT_RETENTION,
            clock: Arc::new(SystemClock),
        }
    }

    /// Override retention
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Override the clock record TTLs are measured against
    ///
    /// Should be the clock the key-value store expires keys by.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The underlying key-value store
    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    /// Read candidates and split them into live records and ghost keys
    async fn load(&self, keys: &[String]) -> Result<(Vec<IncidentRecord>, Vec<String>), KvError> {
        let values = self.kv.get_many(keys).await?;
        let mut live = Vec::with_capacity(values.len());
        let mut ghosts = Vec::new();

        for (key, value) in keys.iter().zip(values) {
            match value {
                Some(raw) => match IncidentRecord::from_json(&raw) {
                    Ok(record) => live.push(record),
                    Err(e) => {
                        // Unreadable entries are skipped, not pruned
                        warn!(key = %key, error = %e, "Skipping unreadable incident record");
                    }
                },
                None => ghosts.push(key.clone()),
            }
        }
        Ok((live, ghosts))
    }

    /// Best-effort removal of index members whose record expired
    async fn prune(&self, scored: Option<&str>, members: Option<&str>, ghosts: &[String]) {
        if ghosts.is_empty() {
            return;
        }
        debug!(count = ghosts.len(), "Pruning stale index entries");
        if let Err(e) = self.kv.remove_members(scored, members, ghosts).await {
            debug!(error = %e, "Stale index cleanup failed");
        }
    }
}

#[async_trait]
impl<K: KvStore + ?Sized + 'static> IncidentStore for PrimaryStore<K> {
    async fn save(&self, record: &IncidentRecord) -> Result<String, StoreError> {
        record.validate().map_err(StoreError::InvalidRecord)?;
        let ttl = remaining_retention(record, self.clock.now_secs(), self.retention)?;

        let key = record.key();
        let value = record.to_json().map_err(|e| StoreError::SaveFailed {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let write = IndexedWrite {
            key: key.clone(),
            value,
            scored_index: similarity_key(&record.project_hash),
            score: record.confidence,
            member_index: severity_key(&record.project_hash, record.severity),
            ttl,
        };

        match self.kv.write_indexed(&write).await {
            Ok(WriteOutcome::Written) => {
                info!(
                    key = %key,
                    severity = %record.severity,
                    confidence = record.confidence,
                    "Saved incident"
                );
                Ok(key)
            }
            Ok(WriteOutcome::KeyExists) => Err(StoreError::SaveFailed {
                key,
                reason: "an incident with this key already exists".to_string(),
            }),
            Err(e) => Err(StoreError::SaveFailed {
                key,
                reason: e.to_string(),
            }),
        }
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

        let index = similarity_key(project);
        let mut found = Vec::with_capacity(limit);
        let mut ghosts = Vec::new();
        let mut offset = 0;

        while found.len() < limit {
            let page = self
                .kv
                .scored_range_desc(&index, min_confidence, offset, PAGE_SIZE)
                .await
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            let exhausted = page.len() < PAGE_SIZE;

            let (live, mut stale) = self
                .load(&page)
                .await
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            ghosts.append(&mut stale);
            found.extend(live.into_iter().take(limit - found.len()));

            if exhausted {
                break;
            }
        }

        self.prune(Some(&index), None, &ghosts).await;
        Ok(found)
    }

    async fn find_by_severity(
        &self,
        project: &ProjectHash,
        severity: Severity,
    ) -> Result<Vec<IncidentRecord>, StoreError> {
        let index = severity_key(project, severity);
        let keys = self
            .kv
            .members(&index)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let (live, ghosts) = self
            .load(&keys)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        self.prune(None, Some(&index), &ghosts).await;
        Ok(live)
    }

    async fn clear_project(&self, project: &ProjectHash) -> Result<usize, StoreError> {
        let similar = similarity_key(project);
        let mut incident_keys = Vec::new();
        for severity in Severity::ALL {
            let members = self
                .kv
                .members(&severity_key(project, severity))
                .await
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            incident_keys.extend(members);
        }
        let ranked = self
            .kv
            .scored_range_desc(&similar, f64::NEG_INFINITY, 0, usize::MAX)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        incident_keys.extend(ranked);
        incident_keys.sort_unstable();
        incident_keys.dedup();

        let removed = self
            .kv
            .delete(&incident_keys)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut index_keys = vec![similar];
        index_keys.extend(Severity::ALL.iter().map(|s| severity_key(project, *s)));
        self.kv
            .delete(&index_keys)
            .await
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        info!(project = %project, removed, "Cleared project incident memory");
        Ok(removed)
    }

    async fn health_check(&self) -> bool {
        match self.kv.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(backend = self.kv.name(), error = %e, "Health check failed");
                false
            }
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::kv::MemoryKv;
    use crate::store::record::incident_key;

    fn project(hash: &str) -> ProjectHash {
        ProjectHash::parse(hash).unwrap()
    }

    fn store_with_clock() -> (PrimaryStore<MemoryKv>, Arc<ManualClock>, Arc<MemoryKv>) {
        let clock = Arc::new(ManualClock::default());
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let store = PrimaryStore::new(kv.clone()).with_clock(clock.clone());
        (store, clock, kv)
    }

    #[tokio::test]
    async fn test_save_writes_three_keys_with_retention() {
        let (store, clock, kv) = store_with_clock();
        let record = IncidentRecord::new(project("abc123"), clock.now_secs(), "oom", 0.8, Severity::P1);

        let key = store.save(&record).await.unwrap();
        assert_eq!(key, incident_key(&project("abc123"), clock.now_secs()));
        for k in [
            key.as_str(),
            "incidents:similar:abc123",
            "incidents:severity:abc123:P1",
        ] {
            assert_eq!(kv.ttl(k), Some(DEFAULT_RETENTION), "ttl of {k}");
        }
    }

    #[tokio::test]
    async fn test_back_dated_record_keeps_its_own_expiry() {
        let (store, clock, kv) = store_with_clock();
        let store = store.with_retention(Duration::from_secs(100));
        let now = clock.now_secs();

        store
            .save(&IncidentRecord::new(project("abc"), now, "fresh", 0.9, Severity::P1))
            .await
            .unwrap();
        let old = IncidentRecord::new(project("abc"), now - 60, "old", 0.8, Severity::P1);
        let key = store.save(&old).await.unwrap();

        assert_eq!(kv.ttl(&key), Some(Duration::from_secs(40)));
        assert_eq!(kv.ttl("incidents:similar:abc"), Some(Duration::from_secs(100)));
        assert_eq!(kv.ttl("incidents:severity:abc:P1"), Some(Duration::from_secs(100)));

        clock.advance(Duration::from_secs(40));
        let found = store.find_similar(&project("abc"), 0.0, 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hypothesis, "fresh");
    }

    #[tokio::test]
    async fn test_record_past_retention_is_rejected() {
        let (store, clock, kv) = store_with_clock();
        let store = store.with_retention(Duration::from_secs(100));
        let stale =
            IncidentRecord::new(project("abc"), clock.now_secs() - 100, "h", 0.5, Severity::P2);
        assert!(matches!(
            store.save(&stale).await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_confidence_is_rejected() {
        let (store, clock, kv) = store_with_clock();
        let record = IncidentRecord::new(project("abc"), clock.now_secs(), "h", 1.5, Severity::P2);
        assert!(matches!(
            store.save(&record).await,
            Err(StoreError::InvalidRecord(_))
        ));
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_ghost_members_are_skipped_and_pruned() {
        let (store, clock, kv) = store_with_clock();
        let now = clock.now_secs();
        for (offset, confidence) in [(0, 0.9), (1, 0.8), (2, 0.7)] {
            let record =
                IncidentRecord::new(project("abc"), now + offset, "h", confidence, Severity::P2);
            store.save(&record).await.unwrap();
        }
        kv.remove_key(&incident_key(&project("abc"), now));

        let found = store.find_similar(&project("abc"), 0.0, 2).await.unwrap();
        let confidences: Vec<f64> = found.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, vec![0.8, 0.7]);

        let ranked = kv
            .scored_range_desc("incidents:similar:abc", 0.0, 0, 10)
            .await
            .unwrap();
        assert_eq!(ranked.len(), 2);

        let by_severity = store.find_by_severity(&project("abc"), Severity::P2).await.unwrap();
        assert_eq!(by_severity.len(), 2);
        assert_eq!(kv.members("incidents:severity:abc:P2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_similarity_pages_past_first_batch() {
        let (store, clock, _kv) = store_with_clock();
        let now = clock.now_secs();
        for i in 0..(PAGE_SIZE as i64 + 8) {
            let record = IncidentRecord::new(project("abc"), now + i, "h", 0.5, Severity::P3);
            store.save(&record).await.unwrap();
        }

        let found = store.find_similar(&project("abc"), 0.5, 100).await.unwrap();
        assert_eq!(found.len(), PAGE_SIZE + 8);
        // Equal scores come back by key descending
        assert_eq!(found[0].timestamp, now + PAGE_SIZE as i64 + 7);
    }

    #[tokio::test]
    async fn test_clear_project_removes_only_that_project() {
        let (store, clock, kv) = store_with_clock();
        let now = clock.now_secs();
        store
            .save(&IncidentRecord::new(project("aaa"), now, "h", 0.9, Severity::P0))
            .await
            .unwrap();
        store
            .save(&IncidentRecord::new(project("aaa"), now + 1, "h", 0.4, Severity::P3))
            .await
            .unwrap();
        store
            .save(&IncidentRecord::new(project("bbb"), now, "h", 0.9, Severity::P0))
            .await
            .unwrap();

        assert_eq!(store.clear_project(&project("aaa")).await.unwrap(), 2);
        assert!(store.find_similar(&project("aaa"), 0.0, 10).await.unwrap().is_empty());
        assert_eq!(store.find_similar(&project("bbb"), 0.0, 10).await.unwrap().len(), 1);
        assert_eq!(kv.key_count(), 3);
    }

    #[tokio::test]
    async fn test_health_check_and_kind() {
        let (store, _clock, _kv) = store_with_clock();
        assert!(store.health_check().await);
        assert_eq!(store.kind(), BackendKind::Primary);
    }
}
