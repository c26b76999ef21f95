//! Redis-backed [`KvStore`]
//!
//! Multi-key mutations run as Lua scripts so Redis applies them atomically.
//! Every round trip is bounded by an operation timeout; the managed connection
//! reconnects on its own after transient failures.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use tracing::debug;

use super::{HealthCounters, HealthEvent, IndexedWrite, KvError, KvStore, WriteOutcome};

/// Default bound on a single Redis round trip
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

// KEYS: primary, sorted set, set. ARGV: value, score, ttl seconds.
// Returns 0 when the primary key already exists. Index expiry only grows.
const WRITE_INDEXED_LUA: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
local zt = redis.call('TYPE', KEYS[2])['ok']
if zt ~= 'none' and zt ~= 'zset' then
  return redis.error_reply('WRONGTYPE ' .. KEYS[2] .. ' holds ' .. zt)
end
local st = redis.call('TYPE', KEYS[3])['ok']
if st ~= 'none' and st ~= 'set' then
  return redis.error_reply('WRONGTYPE ' .. KEYS[3] .. ' holds ' .. st)
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[3])
local ttl = tonumber(ARGV[3])
redis.call('ZADD', KEYS[2], ARGV[2], KEYS[1])
if redis.call('TTL', KEYS[2]) < ttl then
  redis.call('EXPIRE', KEYS[2], ttl)
end
redis.call('SADD', KEYS[3], KEYS[1])
if redis.call('TTL', KEYS[3]) < ttl then
  redis.call('EXPIRE', KEYS[3], ttl)
end
return 1
";

// KEYS: health hash. ARGV: event, latency ms, completion secs, window secs.
const MERGE_HEALTH_LUA: &str = r"
if ARGV[1] == 'success' then
  local count = redis.call('HINCRBY', KEYS[1], 'success_count', 1)
  local avg = tonumber(redis.call('HGET', KEYS[1], 'avg_latency_ms') or '0') or 0
  avg = avg + (tonumber(ARGV[2]) - avg) / count
  redis.call('HSET', KEYS[1], 'avg_latency_ms', tostring(avg), 'last_success', ARGV[3])
else
  redis.call('HINCRBY', KEYS[1], 'failure_count', 1)
end
redis.call('EXPIRE', KEYS[1], ARGV[4])
return 1
";

/// Remote key-value store on Redis
pub struct RedisKv {
    conn: ConnectionManager,
    op_timeout: Duration,
    write_script: Script,
    health_script: Script,
}

impl RedisKv {
    /// Open a managed connection, giving up after `connect_timeout`
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, KvError> {
        let client = Client::open(url)?;
        let conn = match tokio::time::timeout(connect_timeout, ConnectionManager::new(client)).await
        {
            Ok(conn) => conn?,
            Err(_) => return Err(KvError::Timeout(connect_timeout)),
        };
        debug!(url = %redact(url), "Connected to Redis");

        Ok(Self {
            conn,
            op_timeout: DEFAULT_OP_TIMEOUT,
            write_script: Script::new(WRITE_INDEXED_LUA),
            health_script: Script::new(MERGE_HEALTH_LUA),
        })
    }

    /// Override the per-operation timeout
    #[must_use]
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    async fn bounded<T>(&self, op: impl Future<Output = RedisResult<T>>) -> Result<T, KvError> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(KvError::Timeout(self.op_timeout)),
        }
    }
}

impl std::fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisKv")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

/// Strip credentials from a connection URL before logging it
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisKv {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn write_indexed(&self, write: &IndexedWrite) -> Result<WriteOutcome, KvError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.write_script.prepare_invoke();
        invocation
            .key(&write.key)
            .key(&write.scored_index)
            .key(&write.member_index)
            .arg(&write.value)
            .arg(write.score)
            .arg(ttl_secs(write.ttl));

        let written: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(if written == 1 {
            WriteOutcome::Written
        } else {
            WriteOutcome::KeyExists
        })
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, KvError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        self.bounded(redis::cmd("MGET").arg(keys).query_async(&mut conn))
            .await
    }

    async fn scored_range_desc(
        &self,
        index: &str,
        min: f64,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, KvError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        self.bounded(
            redis::cmd("ZREVRANGEBYSCORE")
                .arg(index)
                .arg("+inf")
                .arg(min)
                .arg("LIMIT")
                .arg(i64::try_from(offset).unwrap_or(i64::MAX))
                .arg(i64::try_from(count).unwrap_or(i64::MAX))
                .query_async(&mut conn),
        )
        .await
    }

    async fn members(&self, index: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        self.bounded(redis::cmd("SMEMBERS").arg(index).query_async(&mut conn))
            .await
    }

    async fn remove_members(
        &self,
        scored_index: Option<&str>,
        member_index: Option<&str>,
        members: &[String],
    ) -> Result<(), KvError> {
        if members.is_empty() || (scored_index.is_none() && member_index.is_none()) {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        if let Some(key) = scored_index {
            pipe.cmd("ZREM").arg(key).arg(members).ignore();
        }
        if let Some(key) = member_index {
            pipe.cmd("SREM").arg(key).arg(members).ignore();
        }

        let mut conn = self.conn.clone();
        let (): () = self.bounded(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize, KvError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.bounded(redis::cmd("DEL").arg(keys).query_async(&mut conn))
            .await
    }

    async fn merge_health(
        &self,
        key: &str,
        event: &HealthEvent,
        window: Duration,
    ) -> Result<(), KvError> {
        let mut invocation = self.health_script.prepare_invoke();
        invocation.key(key);
        match *event {
            HealthEvent::Success { latency_ms, at_secs } => {
                invocation.arg("success").arg(latency_ms).arg(at_secs);
            }
            HealthEvent::Failure => {
                invocation.arg("failure").arg(0).arg(0);
            }
        }
        invocation.arg(ttl_secs(window));

        let mut conn = self.conn.clone();
        let _: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn read_health(&self, key: &str) -> Result<Option<HealthCounters>, KvError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = self
            .bounded(redis::cmd("HGETALL").arg(key).query_async(&mut conn))
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        HealthCounters::from_fields(key, &fields).map(Some)
    }
}
