//! Shared Store Adapter
//!
//! Best-effort client for the distributed tier. Values travel as JSON,
//! compressed and marked above a size threshold. Tags are kept as sets
//! (`tag:<name>` → member keys) whose TTL is stretched to cover the
//! longest-lived member, so tag indices expire on their own.
//!
//! Every backend call is bounded by a timeout. Timeouts and errors are
//! logged and counted, then reported to the caller as a miss or `false`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::SharedBackend;
use super::compression::{CompressionConfig, CompressionManager};
use super::entry::TagSet;
use super::stats::CacheStatistics;
use crate::error::{Error, Result};

/// Shared store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedStoreConfig {
    /// Default per-call timeout
    pub timeout_ms: u64,
    /// Prefix for tag-index sets
    pub tag_prefix: String,
    pub compression: CompressionConfig,
}

impl Default for SharedStoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            tag_prefix: "tag:".to_string(),
            compression: CompressionConfig::default(),
        }
    }
}

impl SharedStoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config("shared.timeout_ms must be greater than 0".into()));
        }
        if self.compression.level > 9 {
            return Err(Error::Config("shared.compression.level must be between 0 and 9".into()));
        }
        if self.compression.max_decompressed_bytes == 0 {
            return Err(Error::Config(
                "shared.compression.max_decompressed_bytes must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outcome of a shared-tier read
#[derive(Debug, Clone, PartialEq)]
pub enum SharedLookup {
    /// Decoded JSON payload
    Hit(Bytes),
    /// Service answered, key absent
    Miss,
    /// Service failed, timed out, or returned an unreadable payload
    Degraded,
}

impl SharedLookup {
    pub fn into_hit(self) -> Option<Bytes> {
        match self {
            SharedLookup::Hit(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Result of a tag invalidation
#[derive(Debug, Clone, Default)]
pub struct TagInvalidation {
    /// Keys that existed and were deleted
    pub removed: usize,
    /// Every key listed under the tags
    pub keys: Vec<String>,
}

/// Shared store adapter
pub struct SharedStore {
    backend: Arc<dyn SharedBackend>,
    compression: CompressionManager,
    config: SharedStoreConfig,
    stats: Arc<CacheStatistics>,
}

impl SharedStore {
    pub fn new(
        backend: Arc<dyn SharedBackend>,
        config: SharedStoreConfig,
        stats: Arc<CacheStatistics>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            compression: CompressionManager::with_config(config.compression.clone()),
            config,
            stats,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn config(&self) -> &SharedStoreConfig {
        &self.config
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}", self.config.tag_prefix, tag)
    }

    /// Run one backend call under a timeout, logging and counting failures
    async fn call<T>(
        &self,
        operation: &'static str,
        key: &str,
        timeout: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        if let Err(e) = &result {
            self.stats.record_shared_error();
            warn!(
                backend = self.backend.name(),
                operation,
                key = %key,
                error = %e,
                "Shared store call failed"
            );
        }
        result
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read and decode a payload with the default timeout
    pub async fn lookup(&self, key: &str) -> SharedLookup {
        self.lookup_with_timeout(key, self.config.timeout()).await
    }

    pub async fn lookup_with_timeout(&self, key: &str, timeout: Duration) -> SharedLookup {
        let raw = match self.call("get", key, timeout, self.backend.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return SharedLookup::Miss,
            Err(_) => return SharedLookup::Degraded,
        };

        match self.compression.decode(&raw) {
            Ok(payload) => SharedLookup::Hit(payload),
            Err(e) => {
                self.stats.record_shared_error();
                warn!(key = %key, error = %e, "Unreadable shared payload, treating as miss");
                SharedLookup::Degraded
            }
        }
    }

    /// Time left before the service expires `key`; `None` when the key is
    /// gone, has no expiry, or the call failed
    pub async fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        self.call("ttl", key, self.config.timeout(), self.backend.ttl(key))
            .await
            .ok()
            .flatten()
    }

    /// Read the decoded JSON payload
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.lookup(key).await.into_hit()
    }

    /// Read and deserialize a value
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key).await?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to deserialize shared value");
                None
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a serialized JSON payload with a TTL and tags.
    ///
    /// Returns `false` if the value or any tag index could not be written.
    pub async fn set(&self, key: &str, payload: &[u8], ttl: Duration, tags: &TagSet) -> bool {
        self.set_with_timeout(key, payload, ttl, tags, self.config.timeout())
            .await
    }

    pub async fn set_with_timeout(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
        tags: &TagSet,
        timeout: Duration,
    ) -> bool {
        let encoded = self.compression.encode(payload);
        let ttl_secs = ttl_seconds(ttl);
        let compressed = encoded.len() != payload.len();

        if self
            .call("set_ex", key, timeout, self.backend.set_ex(key, encoded, ttl_secs))
            .await
            .is_err()
        {
            return false;
        }

        let mut indexed = true;
        for tag in tags {
            indexed &= self.index_tag(key, tag, ttl_secs, timeout).await;
        }

        debug!(key = %key, ttl_secs, compressed, tags = tags.len(), "Shared store set");
        indexed
    }

    /// Add `key` to the tag's set and make sure the set outlives it
    async fn index_tag(&self, key: &str, tag: &str, ttl_secs: u64, timeout: Duration) -> bool {
        let set = self.tag_key(tag);

        if self
            .call("sadd", &set, timeout, self.backend.sadd(&set, key))
            .await
            .is_err()
        {
            return false;
        }

        self.call(
            "expire_at_least",
            &set,
            timeout,
            self.backend.expire_at_least(&set, ttl_secs),
        )
        .await
        .is_ok()
    }

    /// Serialize and write a value
    pub async fn set_value<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, tags: &TagSet) -> bool {
        match serde_json::to_vec(value) {
            Ok(payload) => self.set(key, &payload, ttl, tags).await,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize shared value");
                false
            }
        }
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    pub async fn delete(&self, key: &str) -> bool {
        let keys = [key.to_string()];
        matches!(
            self.call("del", key, self.config.timeout(), self.backend.del(&keys))
                .await,
            Ok(removed) if removed > 0
        )
    }

    /// Delete every member of each tag's set, then the set itself
    pub async fn delete_by_tags(&self, tags: &TagSet) -> usize {
        self.remove_tagged(tags).await.removed
    }

    /// Like [`delete_by_tags`](Self::delete_by_tags), also reporting the
    /// member keys that were targeted
    pub async fn remove_tagged(&self, tags: &TagSet) -> TagInvalidation {
        let timeout = self.config.timeout();
        let mut invalidation = TagInvalidation::default();

        for tag in tags {
            let set = self.tag_key(tag);
            let members = match self
                .call("smembers", &set, timeout, self.backend.smembers(&set))
                .await
            {
                Ok(members) => members,
                Err(_) => continue,
            };

            if !members.is_empty() {
                if let Ok(count) = self
                    .call("del", &set, timeout, self.backend.del(&members))
                    .await
                {
                    invalidation.removed += count as usize;
                }
            }

            let _ = self
                .call("del", &set, timeout, self.backend.del(std::slice::from_ref(&set)))
                .await;
            invalidation.keys.extend(members);
        }

        debug!(?tags, removed = invalidation.removed, "Invalidated shared entries by tag");
        invalidation
    }

    /// Connectivity probe under the default timeout
    pub async fn ping(&self) -> Result<()> {
        match tokio::time::timeout(self.config.timeout(), self.backend.ping()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "ping".into(),
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }
}

/// Whole seconds for `SETEX`/`EXPIRE`, rounded up, at least one
fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}
