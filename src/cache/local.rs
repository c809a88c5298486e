//! Local Store - In-Process LRU Tier
//!
//! Bounded key/value table holding serialized payloads plus the metadata
//! the eviction and expiry policies need.
//!
//! # Locking
//!
//! ```text
//!   structure: RwLock<()>
//!     ├── shared    get / set (fast path) / delete / delete_by_tags / purge
//!     └── exclusive capacity eviction / one idle eviction batch / clear
//!   shard: RwLock<HashMap>   one per shard, held for a key's read-modify-write
//! ```
//!
//! Size and entry counts live in [`CacheStatistics`] and are reserved with
//! compare-and-swap before an insert, so two writers can never jointly push
//! the store past its limits or double-count an overwrite.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::entry::{CacheEntry, TagSet};
use super::shard::ShardedMap;
use super::stats::CacheStatistics;
use crate::error::{Error, Result};

/// Default local capacity (256MB)
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 256 * 1024 * 1024;

/// Default maximum entry count
pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// Maximum aggregate payload size in bytes
    pub max_size_bytes: u64,
    /// Maximum number of entries
    pub max_entries: u64,
    /// Number of lock shards (rounded up to a power of two)
    pub shard_count: usize,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_entries: DEFAULT_MAX_ENTRIES,
            shard_count: 64,
        }
    }
}

impl LocalStoreConfig {
    /// Reject capacities that could never admit an entry
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(Error::Config("local.max_size_bytes must be greater than 0".into()));
        }
        if self.max_entries == 0 {
            return Err(Error::Config("local.max_entries must be greater than 0".into()));
        }
        if self.shard_count == 0 {
            return Err(Error::Config("local.shard_count must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Local Store - bounded LRU table
pub struct LocalStore {
    map: ShardedMap,
    structure: RwLock<()>,
    config: LocalStoreConfig,
    stats: Arc<CacheStatistics>,
}

impl LocalStore {
    /// Create a local store reporting into `stats`
    pub fn new(config: LocalStoreConfig, stats: Arc<CacheStatistics>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            map: ShardedMap::new(config.shard_count),
            structure: RwLock::new(()),
            config,
            stats,
        })
    }

    /// Create a local store with its own statistics
    pub fn standalone(config: LocalStoreConfig) -> Result<Self> {
        Self::new(config, Arc::new(CacheStatistics::new()))
    }

    /// Get a payload.
    ///
    /// An expired entry is removed and reported as a miss. A hit refreshes
    /// recency and bumps the hit count.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<Bytes> {
        let _structure = self.structure.read();
        let mut shard = self.map.shard_for(key).write();

        match shard.get_mut(key) {
            None => return None,
            Some(entry) if !entry.is_expired_at(now) => {
                entry.record_hit(now);
                return Some(entry.value().clone());
            }
            Some(_) => {}
        }

        if let Some(expired) = shard.remove(key) {
            self.release(expired.size_bytes());
            self.stats.record_expiration();
            debug!(key = %key, "Purged expired entry on read");
        }
        None
    }

    /// Insert or overwrite a payload.
    ///
    /// Returns `false` when the entry cannot be admitted even after
    /// eviction (payload larger than the whole store).
    pub fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>, tags: TagSet) -> bool {
        self.set_at(key, value, ttl, tags, Instant::now())
    }

    pub(crate) fn set_at(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        tags: TagSet,
        now: Instant,
    ) -> bool {
        let entry = CacheEntry::new_at(key, value, ttl, tags, now);
        let size = entry.size_bytes();

        if size > self.config.max_size_bytes {
            warn!(
                key = %key,
                size_bytes = size,
                max_size_bytes = self.config.max_size_bytes,
                "Entry exceeds local store capacity, not cached"
            );
            return false;
        }

        // Fast path: room is available without touching other keys
        {
            let _structure = self.structure.read();
            let mut shard = self.map.shard_for(key).write();
            let previous = shard.get(key).map(CacheEntry::size_bytes);
            if self.try_reserve(previous, size) {
                shard.insert(key.to_string(), entry);
                return true;
            }
        }

        // Slow path: capacity enforcement under the exclusive structural lock
        let _structure = self.structure.write();

        if let Some(old) = self.map.shard_for(key).write().remove(key) {
            self.release(old.size_bytes());
        }

        let evicted = self.evict_lru_for(size);
        if !self.fits(size) {
            warn!(key = %key, size_bytes = size, evicted, "Local store could not admit entry after eviction");
            return false;
        }

        self.map.shard_for(key).write().insert(key.to_string(), entry);
        self.stats.size_counter().fetch_add(size, Ordering::AcqRel);
        self.stats.entry_counter().fetch_add(1, Ordering::AcqRel);

        if evicted > 0 {
            debug!(key = %key, evicted, "Admitted entry after LRU eviction");
        }
        true
    }

    /// Remove an entry, returning whether it existed
    pub fn delete(&self, key: &str) -> bool {
        let _structure = self.structure.read();
        let removed = self.map.shard_for(key).write().remove(key);
        match removed {
            Some(entry) => {
                self.release(entry.size_bytes());
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose tags intersect `tags`
    pub fn delete_by_tags(&self, tags: &TagSet) -> usize {
        if tags.is_empty() {
            return 0;
        }

        let _structure = self.structure.read();
        let mut removed = 0;

        for shard in self.map.shards() {
            let mut guard = shard.write();
            let mut released = Vec::new();
            guard.retain(|_, entry| {
                if entry.has_any_tag(tags) {
                    released.push(entry.size_bytes());
                    false
                } else {
                    true
                }
            });
            drop(guard);

            for size in released {
                self.release(size);
                removed += 1;
            }
        }

        debug!(?tags, removed, "Invalidated local entries by tag");
        removed
    }

    /// Drop every entry
    pub fn clear(&self) -> usize {
        let _structure = self.structure.write();
        let mut removed = 0;
        for shard in self.map.shards() {
            let mut guard = shard.write();
            removed += guard.len();
            guard.clear();
        }
        self.stats.size_counter().store(0, Ordering::Release);
        self.stats.entry_counter().store(0, Ordering::Release);
        removed
    }

    // =========================================================================
    // Maintenance hooks
    // =========================================================================

    /// Remove up to `max_batch` expired entries
    pub fn purge_expired(&self, max_batch: usize) -> usize {
        self.purge_expired_at(max_batch, Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, max_batch: usize, now: Instant) -> usize {
        let _structure = self.structure.read();
        let mut purged = 0;

        for shard in self.map.shards() {
            if purged >= max_batch {
                break;
            }
            let mut guard = shard.write();
            let expired: Vec<String> = guard
                .iter()
                .filter(|(_, entry)| entry.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .take(max_batch - purged)
                .collect();

            for key in expired {
                if let Some(entry) = guard.remove(&key) {
                    self.release(entry.size_bytes());
                    self.stats.record_expiration();
                    purged += 1;
                }
            }
        }

        purged
    }

    /// Evict entries idle for at least `max_idle`, least recently used first,
    /// until the store is at or below `target_size_bytes` or `max_batch`
    /// entries have been removed.
    pub fn evict_idle(&self, max_idle: Duration, target_size_bytes: u64, max_batch: usize) -> usize {
        self.evict_idle_at(max_idle, target_size_bytes, max_batch, Instant::now())
    }

    pub(crate) fn evict_idle_at(
        &self,
        max_idle: Duration,
        target_size_bytes: u64,
        max_batch: usize,
        now: Instant,
    ) -> usize {
        if max_batch == 0 {
            return 0;
        }

        // Scan under the shared lock; writers keep running
        let mut candidates: Vec<_> = {
            let _structure = self.structure.read();
            self.map
                .shards()
                .flat_map(|shard| {
                    shard
                        .read()
                        .values()
                        .filter(|entry| entry.idle_for(now) >= max_idle)
                        .map(|entry| (entry.lru_rank(), entry.key().to_string()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        if candidates.len() > max_batch {
            candidates.select_nth_unstable(max_batch - 1);
            candidates.truncate(max_batch);
        }
        candidates.sort_unstable();

        // Exclusive only for one batch of removals
        let _structure = self.structure.write();
        let mut evicted = 0;
        for (rank, key) in candidates {
            if self.size_bytes() <= target_size_bytes {
                break;
            }
            let mut shard = self.map.shard_for(&key).write();
            // Skip entries read or rewritten since the scan
            let unchanged = shard.get(&key).map_or(false, |entry| entry.lru_rank() == rank);
            if !unchanged {
                continue;
            }
            if let Some(entry) = shard.remove(&key) {
                self.release(entry.size_bytes());
                self.stats.record_eviction();
                evicted += 1;
            }
        }

        evicted
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Whether `key` is physically resident (expired entries included)
    pub fn contains(&self, key: &str) -> bool {
        self.map.shard_for(key).read().contains_key(key)
    }

    /// Copy of an entry without touching its recency
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.map.shard_for(key).read().get(key).cloned()
    }

    /// Sorted list of resident keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .map
            .shards()
            .flat_map(|shard| shard.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.stats.entries() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> u64 {
        self.stats.size_bytes()
    }

    pub fn capacity(&self) -> u64 {
        self.config.max_size_bytes
    }

    /// Size utilization in `[0, 1]`
    pub fn utilization(&self) -> f64 {
        self.size_bytes() as f64 / self.config.max_size_bytes as f64
    }

    pub fn config(&self) -> &LocalStoreConfig {
        &self.config
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Atomically claim room for an insert. `previous` is the size of the
    /// entry being overwritten, if any.
    fn try_reserve(&self, previous: Option<u64>, size: u64) -> bool {
        let max_size = self.config.max_size_bytes;
        let size_counter = self.stats.size_counter();

        match previous {
            Some(old) => size_counter
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    let next = current.saturating_sub(old) + size;
                    (next <= max_size).then_some(next)
                })
                .is_ok(),
            None => {
                let entries = self.stats.entry_counter();
                let max_entries = self.config.max_entries;
                if entries
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max_entries).then_some(n + 1)
                    })
                    .is_err()
                {
                    return false;
                }

                let reserved = size_counter
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                        (current + size <= max_size).then_some(current + size)
                    })
                    .is_ok();
                if !reserved {
                    entries.fetch_sub(1, Ordering::AcqRel);
                }
                reserved
            }
        }
    }

    fn release(&self, size: u64) {
        self.stats.size_counter().fetch_sub(size, Ordering::AcqRel);
        self.stats.entry_counter().fetch_sub(1, Ordering::AcqRel);
    }

    fn fits(&self, incoming: u64) -> bool {
        self.size_bytes() + incoming <= self.config.max_size_bytes
            && self.stats.entries() < self.config.max_entries
    }

    /// Evict least-recently-used entries until `incoming` bytes fit.
    /// Caller holds the structural lock exclusively.
    fn evict_lru_for(&self, incoming: u64) -> usize {
        if self.fits(incoming) {
            return 0;
        }

        let mut candidates: Vec<_> = self
            .map
            .shards()
            .flat_map(|shard| {
                shard
                    .read()
                    .values()
                    .map(|entry| (entry.lru_rank(), entry.key().to_string()))
                    .collect::<Vec<_>>()
            })
            .collect();
        candidates.sort_unstable();

        let mut evicted = 0;
        for (_, key) in candidates {
            if self.fits(incoming) {
                break;
            }
            if let Some(entry) = self.map.shard_for(&key).write().remove(&key) {
                self.release(entry.size_bytes());
                self.stats.record_eviction();
                evicted += 1;
                debug!(key = %key, "Evicted least-recently-used entry");
            }
        }
        evicted
    }
}

// =============================================================================
// Tests
// =============================================================================
