//! In-Process Key-Value Store
//!
//! Emulates the subset of Redis semantics the crate relies on: per-key
//! expiration, sorted sets, sets and hash-shaped health aggregates. Expiration
//! is evaluated lazily against a [`Clock`], so a simulated clock can age keys
//! out in tests. Every operation runs under a single lock, which makes each
//! one atomic.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{HealthCounters, HealthEvent, IndexedWrite, KvError, KvStore, WriteOutcome};
use crate::clock::{Clock, SystemClock};
use crate::store::index::{MembershipIndex, ScoredIndex};

#[derive(Debug)]
enum Value {
    Text(String),
    Scored(ScoredIndex),
    Members(MembershipIndex),
    Health(HealthCounters),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Scored(_) => "zset",
            Self::Members(_) => "set",
            Self::Health(_) => "hash",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    /// Unix millis; `None` = no expiration
    expires_at: Option<i64>,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
}

impl State {
    /// Live entry for `key`, evicting it first if it has expired
    fn live(&mut self, key: &str, now: i64) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| at <= now);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn wrong_type(key: &str, expected: &str, found: &Value) -> KvError {
        KvError::Corrupt {
            key: key.to_string(),
            reason: format!("expected {expected}, found {}", found.type_name()),
        }
    }

    fn scored_mut(&mut self, key: &str, now: i64) -> Result<&mut ScoredIndex, KvError> {
        self.live(key, now);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Scored(ScoredIndex::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Scored(index) => Ok(index),
            other => Err(Self::wrong_type(key, "zset", other)),
        }
    }

    fn members_mut(&mut self, key: &str, now: i64) -> Result<&mut MembershipIndex, KvError> {
        self.live(key, now);
        let entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Members(MembershipIndex::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Members(set) => Ok(set),
            other => Err(Self::wrong_type(key, "set", other)),
        }
    }

    /// Push an index's expiry out to `expires_at`, never pull it in
    fn extend_expiry(&mut self, key: &str, expires_at: i64) {
        if let Some(entry) = self.entries.get_mut(key) {
            let current = entry.expires_at.unwrap_or(i64::MIN);
            entry.expires_at = Some(current.max(expires_at));
        }
    }
}

/// In-process [`KvStore`]
pub struct MemoryKv {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryKv {
    /// Store driven by the system clock
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store driven by the given clock
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Number of live keys
    #[must_use]
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        let state = self.state.lock();
        state
            .entries
            .values()
            .filter(|e| e.expires_at.map_or(true, |at| at > now))
            .count()
    }

    /// Remaining time to live of a key, if it is live and expiring
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let at = state.live(key, now)?.expires_at?;
        u64::try_from(at - now).ok().map(Duration::from_millis)
    }

    /// Delete one key without touching any index that references it
    ///
    /// Reproduces a primary entry that vanished while its index entries
    /// survived.
    pub fn remove_key(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    fn expiry_from(&self, now: i64, ttl: Duration) -> i64 {
        now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv")
            .field("keys", &self.state.lock().entries.len())
            .finish()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), KvError> {
        Ok(())
    }

    async fn write_indexed(&self, write: &IndexedWrite) -> Result<WriteOutcome, KvError> {
        let now = self.clock.now_millis();
        let expires_at = self.expiry_from(now, write.ttl);
        let mut state = self.state.lock();

        if state.live(&write.key, now).is_some() {
            return Ok(WriteOutcome::KeyExists);
        }

        // Validate index types before mutating anything
        for (key, expected) in [(&write.scored_index, "zset"), (&write.member_index, "set")] {
            if let Some(entry) = state.live(key, now) {
                let matches = matches!(
                    (&entry.value, expected),
                    (Value::Scored(_), "zset") | (Value::Members(_), "set")
                );
                if !matches {
                    return Err(State::wrong_type(key, expected, &entry.value));
                }
            }
        }

        state.entries.insert(
            write.key.clone(),
            Entry {
                value: Value::Text(write.value.clone()),
                expires_at: Some(expires_at),
            },
        );
        state
            .scored_mut(&write.scored_index, now)?
            .insert(write.key.clone(), write.score);
        state.extend_expiry(&write.scored_index, expires_at);
        state
            .members_mut(&write.member_index, now)?
            .insert(write.key.clone());
        state.extend_expiry(&write.member_index, expires_at);

        Ok(WriteOutcome::Written)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        Ok(keys
            .iter()
            .map(|key| match state.live(key, now) {
                Some(Entry {
                    value: Value::Text(text),
                    ..
                }) => Some(text.clone()),
                _ => None,
            })
            .collect())
    }

    async fn scored_range_desc(
        &self,
        index: &str,
        min: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, KvError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        match state.live(index, now) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Scored(scored),
                ..
            }) => Ok(scored
                .range_desc(min, f64::INFINITY, offset, count)
                .into_iter()
                .map(str::to_string)
                .collect()),
            Some(other) => Err(State::wrong_type(index, "zset", &other.value)),
        }
    }

    async fn members(&self, index: &str) -> Result<Vec<String>, KvError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        match state.live(index, now) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Members(set),
                ..
            }) => Ok(set.members().map(str::to_string).collect()),
            Some(other) => Err(State::wrong_type(index, "set", &other.value)),
        }
    }

    async fn remove_members(
        &self,
        scored_index: Option<&str>,
        member_index: Option<&str>,
        members: &[String],
    ) -> Result<(), KvError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        if let Some(key) = scored_index {
            let mut emptied = false;
            if let Some(Entry {
                value: Value::Scored(scored),
                ..
            }) = state.live(key, now)
            {
                for member in members {
                    scored.remove(member);
                }
                emptied = scored.is_empty();
            }
            if emptied {
                state.entries.remove(key);
            }
        }

        if let Some(key) = member_index {
            let mut emptied = false;
            if let Some(Entry {
                value: Value::Members(set),
                ..
            }) = state.live(key, now)
            {
                for member in members {
                    set.remove(member);
                }
                emptied = set.is_empty();
            }
            if emptied {
                state.entries.remove(key);
            }
        }

        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, KvError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let mut removed = 0;
        for key in keys {
            if state.live(key, now).is_some() {
                state.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn merge_health(
        &self,
        key: &str,
        event: &HealthEvent,
        window: Duration,
    ) -> Result<(), KvError> {
        let now = self.clock.now_millis();
        let expires_at = self.expiry_from(now, window);
        let mut state = self.state.lock();

        match state.live(key, now) {
            Some(Entry {
                value: Value::Health(counters),
                expires_at: expiry,
            }) => {
                counters.apply(event);
                *expiry = Some(expires_at);
            }
            Some(other) => return Err(State::wrong_type(key, "hash", &other.value)),
            None => {
                let mut counters = HealthCounters::default();
                counters.apply(event);
                state.entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Health(counters),
                        expires_at: Some(expires_at),
                    },
                );
            }
        }
        Ok(())
    }

    async fn read_health(&self, key: &str) -> Result<Option<HealthCounters>, KvError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        match state.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Health(counters),
                ..
            }) => Ok(Some(*counters)),
            Some(other) => Err(State::wrong_type(key, "hash", &other.value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn write(key: &str, score: f64, ttl_secs: u64) -> IndexedWrite {
        IndexedWrite {
            key: key.to_string(),
            value: format!("value of {key}"),
            scored_index: "zs".to_string(),
            score,
            member_index: "set".to_string(),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    #[tokio::test]
    async fn test_write_indexed_and_read_back() {
        let kv = MemoryKv::new();
        let outcome = kv.write_indexed(&write("k1", 0.5, 60)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);

        let values = kv
            .get_many(&["k1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("value of k1".to_string()), None]);
        assert_eq!(kv.scored_range_desc("zs", 0.0, 0, 10).await.unwrap(), vec!["k1"]);
        assert_eq!(kv.members("set").await.unwrap(), vec!["k1"]);
    }

    #[tokio::test]
    async fn test_existing_key_is_not_overwritten() {
        let kv = MemoryKv::new();
        kv.write_indexed(&write("k1", 0.5, 60)).await.unwrap();

        let mut second = write("k1", 0.9, 60);
        second.value = "other".to_string();
        assert_eq!(
            kv.write_indexed(&second).await.unwrap(),
            WriteOutcome::KeyExists
        );

        let values = kv.get_many(&["k1".to_string()]).await.unwrap();
        assert_eq!(values, vec![Some("value of k1".to_string())]);
        assert!(kv.scored_range_desc("zs", 0.8, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_three_keys_share_ttl_and_expire() {
        let clock = Arc::new(ManualClock::default());
        let kv = MemoryKv::with_clock(clock.clone());
        kv.write_indexed(&write("k1", 0.5, 100)).await.unwrap();

        assert_eq!(kv.ttl("k1"), Some(Duration::from_secs(100)));
        assert_eq!(kv.ttl("zs"), Some(Duration::from_secs(100)));
        assert_eq!(kv.ttl("set"), Some(Duration::from_secs(100)));

        clock.advance(Duration::from_secs(100));
        assert_eq!(kv.get_many(&["k1".to_string()]).await.unwrap(), vec![None]);
        assert!(kv.scored_range_desc("zs", 0.0, 0, 10).await.unwrap().is_empty());
        assert!(kv.members("set").await.unwrap().is_empty());
        assert_eq!(kv.key_count(), 0);
    }

    #[tokio::test]
    async fn test_shorter_write_does_not_shorten_index_expiry() {
        let clock = Arc::new(ManualClock::default());
        let kv = MemoryKv::with_clock(clock.clone());
        kv.write_indexed(&write("k1", 0.5, 100)).await.unwrap();
        kv.write_indexed(&write("k2", 0.7, 10)).await.unwrap();

        assert_eq!(kv.ttl("k2"), Some(Duration::from_secs(10)));
        assert_eq!(kv.ttl("zs"), Some(Duration::from_secs(100)));
        assert_eq!(kv.ttl("set"), Some(Duration::from_secs(100)));

        clock.advance(Duration::from_secs(50));
        assert_eq!(kv.scored_range_desc("zs", 0.0, 0, 10).await.unwrap().len(), 2);
        assert_eq!(
            kv.get_many(&["k1".to_string(), "k2".to_string()]).await.unwrap(),
            vec![Some("value of k1".to_string()), None]
        );
        assert_eq!(kv.members("set").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_remove_members_drops_empty_indexes() {
        let kv = MemoryKv::new();
        kv.write_indexed(&write("k1", 0.5, 60)).await.unwrap();
        kv.remove_members(Some("zs"), Some("set"), &["k1".to_string()])
            .await
            .unwrap();

        assert_eq!(kv.ttl("zs"), None);
        assert_eq!(kv.ttl("set"), None);
        assert_eq!(kv.key_count(), 1);
    }

    #[tokio::test]
    async fn test_health_merge_resets_window() {
        let clock = Arc::new(ManualClock::default());
        let kv = MemoryKv::with_clock(clock.clone());
        let window = Duration::from_secs(3600);

        kv.merge_health("h", &HealthEvent::Failure, window).await.unwrap();
        clock.advance(Duration::from_secs(3000));
        kv.merge_health("h", &HealthEvent::Failure, window).await.unwrap();
        clock.advance(Duration::from_secs(3000));

        let counters = kv.read_health("h").await.unwrap().unwrap();
        assert_eq!(counters.failure_count, 2);

        clock.advance(Duration::from_secs(601));
        assert!(kv.read_health("h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let kv = MemoryKv::new();
        kv.merge_health("zs", &HealthEvent::Failure, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            kv.write_indexed(&write("k1", 0.5, 60)).await,
            Err(KvError::Corrupt { .. })
        ));
        // Nothing was written
        assert_eq!(kv.get_many(&["k1".to_string()]).await.unwrap(), vec![None]);
    }
}
