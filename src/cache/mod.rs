//! Two-Tier Cache
//!
//! In-process LRU store in front of an optional distributed key/value
//! service, unified by the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Cache Orchestrator                            │
//! │             get / set / delete / invalidate_by_tags / memoize        │
//! ├───────────────────────────────────┬──────────────────────────────────┤
//! │  Local Store (in-process)         │  Shared Store (distributed)      │
//! │  ┌─────────────────────────────┐  │  ┌────────────────────────────┐  │
//! │  │ ShardedMap + structural lock│  │  │ JSON + GZIP:/LZ4: marker   │  │
//! │  │ LRU eviction, TTL, tags     │  │  │ SETEX, tag:<name> sets     │  │
//! │  └─────────────────────────────┘  │  │ per-call timeout           │  │
//! │         ▲                         │  └────────────────────────────┘  │
//! │         │ purge / pressure        │          SharedBackend           │
//! │    Maintenance loops              │       (in-memory | Redis)        │
//! └───────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! The cache fails open: shared-tier outages, serialization failures and
//! capacity exhaustion turn into misses or `false` returns, never errors.

pub mod backend;
pub mod compression;
mod entry;
mod local;
mod maintenance;
mod memo;
mod orchestrator;
mod shard;
mod shared;
mod stats;

#[cfg(test)]
mod proptest;

pub use backend::{InMemorySharedBackend, RedisSharedBackend, SharedBackend};
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager};
pub use entry::{tags, CacheEntry, TagSet};
pub use local::{LocalStore, LocalStoreConfig, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_SIZE_BYTES};
pub use maintenance::{EvictionPass, Maintenance, MaintenanceConfig};
pub use memo::{memo_key, Memoized};
pub use orchestrator::{CacheOrchestrator, CacheTier, OrchestratorConfig};
pub use shard::{Shard, ShardedMap};
pub use shared::{SharedLookup, SharedStore, SharedStoreConfig, TagInvalidation};
pub use stats::{CacheStatistics, StatisticsSnapshot};
