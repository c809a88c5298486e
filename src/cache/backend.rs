//! Shared Store Backends
//!
//! The shared tier talks to an external key/value service through the
//! [`SharedBackend`] trait, which mirrors the handful of commands the
//! adapter needs (`GET`, `SETEX`, `DEL`, `SADD`, `SMEMBERS`, `EXPIRE`, `PTTL`).
//!
//! - [`InMemorySharedBackend`]: DashMap-backed, for single-node use and tests
//! - [`RedisSharedBackend`]: Redis through a `deadpool-redis` pool

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Key/value service used by the shared tier
#[async_trait]
pub trait SharedBackend: Send + Sync {
    /// Backend name for logs and health output
    fn name(&self) -> &'static str;

    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// `SETEX key ttl value`
    async fn set_ex(&self, key: &str, value: Bytes, ttl_secs: u64) -> Result<()>;

    /// `DEL key...`, returning how many keys existed
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// `SADD set member`
    async fn sadd(&self, set: &str, member: &str) -> Result<()>;

    /// `SMEMBERS set`
    async fn smembers(&self, set: &str) -> Result<Vec<String>>;

    /// `EXPIRE key ttl`, returning whether the key exists
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Atomically raise the key's TTL to `ttl_secs` unless it already lives
    /// at least that long. A persistent key gets the TTL. Returns whether
    /// the key exists.
    async fn expire_at_least(&self, key: &str, ttl_secs: u64) -> Result<bool>;

    /// Remaining time to live; `None` when the key is missing or persistent
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Connectivity probe
    async fn ping(&self) -> Result<()>;
}

// =============================================================================
// In-Memory Backend
// =============================================================================

#[derive(Debug, Clone)]
enum StoredValue {
    Bytes(Bytes),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Stored {
    value: StoredValue,
    expires_at: Option<Instant>,
}

impl Stored {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory shared backend.
///
/// Supports fault injection (`set_online`, `set_latency`) so callers can be
/// exercised against an unreachable or slow service.
#[derive(Default)]
pub struct InMemorySharedBackend {
    data: DashMap<String, Stored>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    operations: AtomicU64,
}

impl InMemorySharedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the service going away (`false`) or coming back
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::Relaxed);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of commands served
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    /// Whether a live value exists at `key`
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.data.get(key).map_or(false, |s| s.is_live(now))
    }

    /// Overwrite a key with raw bytes and no expiry
    pub fn put_raw(&self, key: &str, value: Bytes) {
        self.data.insert(
            key.to_string(),
            Stored {
                value: StoredValue::Bytes(value),
                expires_at: None,
            },
        );
    }

    async fn enter(&self, operation: &str) -> Result<Instant> {
        self.operations.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(Error::SharedStore {
                operation: operation.to_string(),
                reason: "connection refused".into(),
            });
        }
        Ok(Instant::now())
    }

    /// Drop `key` if it has expired, returning whether a live value remains
    fn purge_if_expired(&self, key: &str, now: Instant) -> bool {
        self.data.remove_if(key, |_, stored| !stored.is_live(now));
        self.data.contains_key(key)
    }
}

#[async_trait]
impl SharedBackend for InMemorySharedBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = self.enter("get").await?;
        if !self.purge_if_expired(key, now) {
            return Ok(None);
        }
        match self.data.get(key).map(|s| s.value.clone()) {
            Some(StoredValue::Bytes(bytes)) => Ok(Some(bytes)),
            Some(StoredValue::Set(_)) => Err(Error::SharedStore {
                operation: "get".into(),
                reason: format!("key '{}' holds a set", key),
            }),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl_secs: u64) -> Result<()> {
        let now = self.enter("set_ex").await?;
        self.data.insert(
            key.to_string(),
            Stored {
                value: StoredValue::Bytes(value),
                expires_at: Some(now + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let now = self.enter("del").await?;
        let removed = keys
            .iter()
            .filter_map(|key| self.data.remove(key))
            .filter(|(_, stored)| stored.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        let now = self.enter("sadd").await?;
        self.purge_if_expired(set, now);

        let mut entry = self.data.entry(set.to_string()).or_insert_with(|| Stored {
            value: StoredValue::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            StoredValue::Set(members) => {
                members.insert(member.to_string());
                Ok(())
            }
            StoredValue::Bytes(_) => Err(Error::SharedStore {
                operation: "sadd".into(),
                reason: format!("key '{}' holds a value", set),
            }),
        }
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        let now = self.enter("smembers").await?;
        if !self.purge_if_expired(set, now) {
            return Ok(Vec::new());
        }
        match self.data.get(set).map(|s| s.value.clone()) {
            Some(StoredValue::Set(members)) => Ok(members.into_iter().collect()),
            Some(StoredValue::Bytes(_)) => Err(Error::SharedStore {
                operation: "smembers".into(),
                reason: format!("key '{}' holds a value", set),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let now = self.enter("expire").await?;
        if !self.purge_if_expired(key, now) {
            return Ok(false);
        }
        Ok(self
            .data
            .get_mut(key)
            .map(|mut stored| stored.expires_at = Some(now + Duration::from_secs(ttl_secs)))
            .is_some())
    }

    async fn expire_at_least(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let now = self.enter("expire_at_least").await?;
        if !self.purge_if_expired(key, now) {
            return Ok(false);
        }
        let deadline = now + Duration::from_secs(ttl_secs);
        // Read and extend under the same shard lock
        Ok(self
            .data
            .get_mut(key)
            .map(|mut stored| {
                if stored.expires_at.map_or(true, |current| current < deadline) {
                    stored.expires_at = Some(deadline);
                }
            })
            .is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = self.enter("ttl").await?;
        if !self.purge_if_expired(key, now) {
            return Ok(None);
        }
        Ok(self.data.get(key).and_then(|stored| {
            stored
                .expires_at
                .map(|deadline| deadline.saturating_duration_since(now))
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.enter("ping").await.map(|_| ())
    }
}

// =============================================================================
// Redis Backend
// =============================================================================

/// Extends a key's TTL only upward, in one server-side step.
/// `PTTL` answers -2 for a missing key and -1 for a persistent one.
const EXPIRE_AT_LEAST_SCRIPT: &str = r#"
local current = redis.call('PTTL', KEYS[1])
if current == -2 then
  return 0
end
local wanted = tonumber(ARGV[1]) * 1000
if current == -1 or current < wanted then
  redis.call('PEXPIRE', KEYS[1], wanted)
end
return 1
"#;

/// Redis shared backend over a connection pool
#[derive(Clone)]
pub struct RedisSharedBackend {
    pool: Pool,
}

impl RedisSharedBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool from a `redis://` URL. Connections are opened lazily.
    pub fn from_url(url: &str) -> Result<Self> {
        let pool = deadpool_redis::Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("invalid redis url '{}': {}", url, e)))?;
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::RedisPool(e.to_string()))
    }
}

#[async_trait]
impl SharedBackend for RedisSharedBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key, value.as_ref(), ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn sadd(&self, set: &str, member: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.sadd::<_, _, ()>(set, member).await?;
        Ok(())
    }

    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn.smembers(set).await?;
        Ok(members)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.connection().await?;
        let applied: bool = conn.expire(key, ttl_secs as i64).await?;
        Ok(applied)
    }

    async fn expire_at_least(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.connection().await?;
        let script = redis::Script::new(EXPIRE_AT_LEAST_SCRIPT);
        let exists: i64 = script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(exists == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection().await?;
        // -2: missing, -1: no expiry
        let remaining: i64 = conn.pttl(key).await?;
        Ok((remaining >= 0).then(|| Duration::from_millis(remaining as u64)))
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
