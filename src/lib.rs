//! tierwatch - Two-Tier Cache with Performance Observability
//!
//! An embeddable cache engine: a bounded in-process LRU store in front of an
//! optional distributed key/value service, with a memoizing wrapper for
//! expensive computations, continuous latency/resource sampling and
//! threshold alerting with hysteresis.
//!
//! # Architecture
//!
//! ```text
//! client ──► CacheOrchestrator ──► LocalStore ──miss──► SharedStore ──► SharedBackend
//!                 │                    ▲                                 (Redis | memory)
//!                 │ samples            │ purge / pressure eviction
//!                 ▼                    │
//!           SampleWindow ──► Sampler ──┴──► AlertEngine ──► AlertSinks
//!                               │
//!                               └──► PerformanceSnapshot history ──► EngineReport
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tierwatch::cache::{tags, CacheTier};
//! use tierwatch::{CacheEngine, EngineConfig};
//!
//! # async fn demo() -> tierwatch::Result<()> {
//! let engine = CacheEngine::builder(EngineConfig::default()).build()?;
//! engine.initialize().await?;
//!
//! let total: u64 = engine
//!     .cache()
//!     .memoize("orders.total")
//!     .tags(tags(["orders"]))
//!     .call(&("customer-42",), || async { 1250 })
//!     .await;
//!
//! engine.cache().invalidate_by_tags(&tags(["orders"]), CacheTier::LocalPreferred).await;
//! engine.shutdown().await;
//! # let _ = total;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - local store, shared store adapter, orchestrator, memoization, maintenance
//! - [`monitoring`] - samples, sampler, resource readers, business metrics, health, Prometheus
//! - [`alerting`] - rules, alert lifecycle, notification sinks, recommendations
//! - [`config`] - YAML engine configuration
//! - [`service`] - engine lifecycle and reporting
//! - [`error`] - error types

pub mod alerting;
pub mod cache;
pub mod config;
pub mod error;
pub mod monitoring;
pub mod service;

pub use cache::{CacheOrchestrator, CacheTier, TagSet};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use service::{CacheEngine, CacheEngineBuilder, EngineReport};
