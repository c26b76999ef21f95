//! Shared Key-Value Layer
//!
//! Both the primary incident backend and the provider health tracker sit on a
//! key-value store with native expiration, sorted sets and sets. This module
//! defines that contract once:
//!
//! ```text
//!            +-------------------+
//!            |  trait KvStore    |
//!            +---------+---------+
//!                      |
//!         +------------+------------+
//!         |                         |
//!  +------+-------+         +-------+-------+
//!  |   RedisKv    |         |   MemoryKv    |
//!  | (remote,     |         | (in-process,  |
//!  |  Lua atomic) |         |  Clock-driven)|
//!  +--------------+         +---------------+
//! ```
//!
//! Every mutating operation is atomic with respect to concurrent readers:
//! Redis runs each one as a single Lua script, the in-process store performs it
//! under one lock.

mod memory;
mod redis_kv;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryKv;
pub use self::redis_kv::RedisKv;

/// Errors from the key-value layer
#[derive(Debug, Error)]
pub enum KvError {
    /// Redis reported an error (connection, protocol, auth, script)
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The operation did not finish within the configured time
    #[error("key-value operation timed out after {0:?}")]
    Timeout(Duration),

    /// Stored data could not be interpreted
    #[error("corrupt value at {key}: {reason}")]
    Corrupt {
        /// Offending key
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

/// A primary value written together with its two index entries
///
/// Applied all-or-nothing: the value is stored under `key`, `key` is added to
/// the sorted set `scored_index` with `score` and to the set `member_index`,
/// all in one step. The value expires after `ttl`. Each index expires after
/// `ttl` too, unless it was already set to live longer.
#[derive(Clone, Debug)]
pub struct IndexedWrite {
    /// Primary key
    pub key: String,
    /// Serialized value
    pub value: String,
    /// Sorted-set key
    pub scored_index: String,
    /// Score of `key` inside `scored_index`
    pub score: f64,
    /// Set key
    pub member_index: String,
    /// Expiration of the value (a lower bound for both indexes)
    pub ttl: Duration,
}

/// Result of an [`IndexedWrite`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Everything was written
    Written,
    /// The primary key already held a live value; nothing was written
    KeyExists,
}

/// One health observation merged into a provider's aggregate
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HealthEvent {
    /// Successful call with its latency
    Success {
        /// Observed latency in milliseconds
        latency_ms: f64,
        /// Completion time, Unix seconds
        at_secs: i64,
    },
    /// Failed call
    Failure,
}

/// Aggregate health counters as stored under `llm:health:{provider}`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HealthCounters {
    /// Successful calls inside the window
    pub success_count: u64,
    /// Failed calls inside the window
    pub failure_count: u64,
    /// Incremental mean latency of successful calls
    pub avg_latency_ms: f64,
    /// Unix seconds of the last success
    pub last_success: Option<i64>,
}

impl HealthCounters {
    /// Apply one event (the merge both backends implement)
    pub fn apply(&mut self, event: &HealthEvent) {
        match *event {
            HealthEvent::Success { latency_ms, at_secs } => {
                self.success_count += 1;
                // newAvg = oldAvg + (latency - oldAvg) / newCount
                self.avg_latency_ms +=
                    (latency_ms - self.avg_latency_ms) / self.success_count as f64;
                self.last_success = Some(at_secs);
            }
            HealthEvent::Failure => {
                self.failure_count += 1;
            }
        }
    }

    /// Decode from the field map of a Redis hash
    pub fn from_fields(key: &str, fields: &HashMap<String, String>) -> Result<Self, KvError> {
        fn field<T: std::str::FromStr>(
            key: &str,
            fields: &HashMap<String, String>,
            name: &str,
        ) -> Result<Option<T>, KvError> {
            fields
                .get(name)
                .map(|raw| {
                    raw.parse::<T>().map_err(|_| KvError::Corrupt {
                        key: key.to_string(),
                        reason: format!("field {name} = {raw:?}"),
                    })
                })
                .transpose()
        }

        Ok(Self {
            success_count: field(key, fields, "success_count")?.unwrap_or(0),
            failure_count: field(key, fields, "failure_count")?.unwrap_or(0),
            avg_latency_ms: field(key, fields, "avg_latency_ms")?.unwrap_or(0.0),
            last_success: field::<i64>(key, fields, "last_success")?.filter(|ts| *ts > 0),
        })
    }
}

/// Key-value store contract
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Short name for logs ("redis", "memory")
    fn name(&self) -> &'static str;

    /// Round-trip check
    async fn ping(&self) -> Result<(), KvError>;

    /// Atomically write a value and its index entries
    async fn write_indexed(&self, write: &IndexedWrite) -> Result<WriteOutcome, KvError>;

    /// Read several values; missing or expired keys yield `None`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError>;

    /// Members of a sorted set with score >= `min`, highest first
    async fn scored_range_desc(
        &self,
        index: &str,
        min: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, KvError>;

    /// Members of a set
    async fn members(&self, index: &str) -> Result<Vec<String>, KvError>;

    /// Remove members from a sorted set and a set (stale reference cleanup)
    ///
    /// Never touches expiration.
    async fn remove_members(
        &self,
        scored_index: Option<&str>,
        member_index: Option<&str>,
        members: &[String],
    ) -> Result<(), KvError>;

    /// Delete keys; returns how many existed
    async fn delete(&self, keys: &[String]) -> Result<usize, KvError>;

    /// Atomically merge a health event and reset the key's expiration to `window`
    async fn merge_health(
        &self,
        key: &str,
        event: &HealthEvent,
        window: Duration,
    ) -> Result<(), KvError>;

    /// Read a health aggregate (`None` when absent or expired)
    async fn read_health(&self, key: &str) -> Result<Option<HealthCounters>, KvError>;
}

/// Key of a provider's health aggregate
#[must_use]
pub fn health_key(provider: &str) -> String {
    format!("llm:health:{provider}")
}
