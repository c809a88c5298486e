//! Sharded Map Implementation
//!
//! Concurrent hashmap split into a power-of-two number of shards, each
//! behind its own `RwLock`. A key's read-modify-write holds only its shard,
//! so writers on unrelated keys rarely meet.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::entry::CacheEntry;

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Single shard containing a hashmap and access statistics
pub struct Shard {
    map: RwLock<HashMap<String, CacheEntry>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl Default for Shard {
    fn default() -> Self {
        Self::new()
    }
}

impl Shard {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Shared access to the shard's table
    pub fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.read()
    }

    /// Exclusive access to the shard's table
    pub fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.map.write()
    }

    /// Number of entries currently resident in this shard
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Sharded map keyed by string
pub struct ShardedMap {
    shards: Box<[Shard]>,
    mask: usize,
}

impl ShardedMap {
    /// Create a map with `shard_count` shards (rounded up to a power of two)
    pub fn new(shard_count: usize) -> Self {
        let count = shard_count.max(1).next_power_of_two();
        let shards: Vec<Shard> = (0..count).map(|_| Shard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            mask: count - 1,
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index for a key
    #[inline]
    pub fn shard_index(&self, key: &str) -> usize {
        (fx_hash(key.as_bytes()) as usize) & self.mask
    }

    /// Shard owning `key`
    #[inline]
    pub fn shard_for(&self, key: &str) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Iterate over all shards
    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.iter()
    }

    /// Total resident entries (including expired ones not yet purged)
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Per-shard entry counts
    pub fn distribution(&self) -> Vec<usize> {
        self.shards.iter().map(|s| s.len()).collect()
    }

    pub fn total_reads(&self) -> u64 {
        self.shards.iter().map(|s| s.read_count()).sum()
    }

    pub fn total_writes(&self) -> u64 {
        self.shards.iter().map(|s| s.write_count()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
