//! Cache Statistics
//!
//! Process-wide counters shared by the orchestrator and the local store.
//! Every counter is a relaxed atomic: increments are never lost, but a
//! snapshot is not a single consistent cut across counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Cache statistics collector
#[derive(Debug, Default)]
pub struct CacheStatistics {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    sets: AtomicU64,
    set_failures: AtomicU64,
    deletes: AtomicU64,
    shared_errors: AtomicU64,
    promotions: AtomicU64,

    // Local store occupancy (authoritative for capacity enforcement)
    size_bytes: AtomicU64,
    entries: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    // Lookups
    pub fn record_local_hit(&self) {
        self.local_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.local_hits.load(Ordering::Relaxed) + self.shared_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Hit rate in `[0, 1]`, or `None` before the first lookup
    pub fn hit_rate(&self) -> Option<f64> {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }

    // Mutations
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self, ok: bool) {
        if ok {
            self.sets.fetch_add(1, Ordering::Relaxed);
        } else {
            self.set_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_shared_error(&self) {
        self.shared_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn shared_errors(&self) -> u64 {
        self.shared_errors.load(Ordering::Relaxed)
    }

    // Occupancy
    pub(crate) fn size_counter(&self) -> &AtomicU64 {
        &self.size_bytes
    }

    pub(crate) fn entry_counter(&self) -> &AtomicU64 {
        &self.entries
    }

    /// Current aggregate size of the local store in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Current number of local store entries
    pub fn entries(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> StatisticsSnapshot {
        let local_hits = self.local_hits.load(Ordering::Relaxed);
        let shared_hits = self.shared_hits.load(Ordering::Relaxed);
        let misses = self.misses();
        let total = local_hits + shared_hits + misses;

        StatisticsSnapshot {
            hits: local_hits + shared_hits,
            local_hits,
            shared_hits,
            misses,
            hit_rate: if total == 0 {
                None
            } else {
                Some((local_hits + shared_hits) as f64 / total as f64)
            },
            evictions: self.evictions(),
            expirations: self.expirations.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            shared_errors: self.shared_errors(),
            promotions: self.promotions.load(Ordering::Relaxed),
            size_bytes: self.size_bytes(),
            entries: self.entries(),
        }
    }
}

/// Point-in-time copy of [`CacheStatistics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub misses: u64,
    pub hit_rate: Option<f64>,
    pub evictions: u64,
    pub expirations: u64,
    pub sets: u64,
    pub set_failures: u64,
    pub deletes: u64,
    pub shared_errors: u64,
    pub promotions: u64,
    pub size_bytes: u64,
    pub entries: u64,
}

// =============================================================================
// Tests
// =============================================================================
