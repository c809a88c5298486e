//! Property-Based Tests for the Local Store
//!
//! # Test Properties
//!
//! 1. **Capacity**: size and entry count never exceed their maxima
//! 2. **LRU survivors**: with no intervening reads, the entries left are
//!    exactly the most recently written ones
//! 3. **TTL**: hit strictly before the deadline, miss at or after it
//! 4. **Tag invalidation**: tagged entries vanish, untagged ones remain

#![cfg(test)]

use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;
use tokio::time::Instant;

use super::entry::{tags, TagSet};
use super::local::{LocalStore, LocalStoreConfig};

fn store(max_size_bytes: u64, max_entries: u64) -> LocalStore {
    LocalStore::standalone(LocalStoreConfig {
        max_size_bytes,
        max_entries,
        shard_count: 8,
    })
    .unwrap()
}

// =============================================================================
// Property Strategies
// =============================================================================

/// Payload sizes for a sequence of writes
fn sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=200, 1..60)
}

// =============================================================================
// Eviction Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_size_never_exceeds_capacity(
        sizes in sizes_strategy(),
        max_size in 200u64..2000,
        max_entries in 1u64..20,
    ) {
        let store = store(max_size, max_entries);
        let t0 = Instant::now();

        for (i, size) in sizes.iter().enumerate() {
            let at = t0 + Duration::from_millis(i as u64);
            let admitted = store.set_at(&format!("k{}", i), Bytes::from(vec![0u8; *size]), None, TagSet::new(), at);
            prop_assert!(admitted);
            prop_assert!(store.size_bytes() <= max_size);
            prop_assert!(store.len() as u64 <= max_entries);
        }
    }

    #[test]
    fn prop_survivors_are_most_recent_suffix(
        sizes in sizes_strategy(),
        max_size in 200u64..2000,
        max_entries in 1u64..20,
    ) {
        let store = store(max_size, max_entries);
        let t0 = Instant::now();

        for (i, size) in sizes.iter().enumerate() {
            let at = t0 + Duration::from_millis(i as u64);
            store.set_at(&format!("k{}", i), Bytes::from(vec![0u8; *size]), None, TagSet::new(), at);
        }

        let mut survivors: Vec<usize> = store
            .keys()
            .iter()
            .map(|k| k[1..].parse().unwrap())
            .collect();
        survivors.sort_unstable();

        // Survivors form a contiguous run ending with the last write
        let n = sizes.len();
        prop_assert_eq!(survivors.last().copied(), Some(n - 1));
        let first = survivors[0];
        prop_assert_eq!(survivors, (first..n).collect::<Vec<_>>());

        // ...and the entry just before the run could not have fit
        if first > 0 {
            let kept: u64 = sizes[first..].iter().map(|s| *s as u64).sum();
            let count = (n - first) as u64;
            let next = sizes[first - 1] as u64;
            prop_assert!(kept + next > max_size || count + 1 > max_entries);
        }
    }

    #[test]
    fn prop_ttl_boundary(ttl_ms in 1u64..10_000, epsilon_ms in 1u64..1000) {
        let store = store(1024, 16);
        let t0 = Instant::now();
        let ttl = Duration::from_millis(ttl_ms);

        store.set_at("k", Bytes::from_static(b"v"), Some(ttl), TagSet::new(), t0);

        let before = t0 + ttl.saturating_sub(Duration::from_millis(epsilon_ms.min(ttl_ms)));
        if before < t0 + ttl {
            prop_assert!(store.get_at("k", before).is_some());
        }
        prop_assert!(store.get_at("k", t0 + ttl + Duration::from_millis(epsilon_ms)).is_none());
        prop_assert!(!store.contains("k"));
    }

    #[test]
    fn prop_tag_invalidation_is_complete(flags in prop::collection::vec(any::<bool>(), 1..50)) {
        let store = store(1 << 20, 1000);

        for (i, tagged) in flags.iter().enumerate() {
            let entry_tags = if *tagged { tags(["x", "other"]) } else { tags(["other"]) };
            store.set(&format!("k{}", i), Bytes::from_static(b"v"), None, entry_tags);
        }

        let expected = flags.iter().filter(|t| **t).count();
        prop_assert_eq!(store.delete_by_tags(&tags(["x"])), expected);

        for (i, tagged) in flags.iter().enumerate() {
            prop_assert_eq!(store.get(&format!("k{}", i)).is_some(), !*tagged);
        }
    }
}
