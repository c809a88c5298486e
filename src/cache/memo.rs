//! Memoizing Wrapper
//!
//! Wraps any async computation with the cache. The key is derived from the
//! computation's name and a SHA-256 digest of its arguments encoded as
//! canonical JSON (object keys sorted):
//!
//! ```text
//!   memo:<name>:<hex sha256(canonical json(args))>
//! ```
//!
//! Concurrent calls with the same key are not coalesced: each caller that
//! misses runs the computation, so wrapped work must be idempotent.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(cache: &tierwatch::cache::CacheOrchestrator) {
//! use std::time::Duration;
//!
//! let total: u64 = cache
//!     .memoize("portfolio.total")
//!     .ttl(Duration::from_secs(60))
//!     .call(&("account-42", 2024), || async { 1_250_000 })
//!     .await;
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::entry::TagSet;
use super::orchestrator::{CacheOrchestrator, CacheTier};
use crate::error::Result;

/// Derive the cache key for `name` called with `args`
pub fn memo_key<A: Serialize + ?Sized>(name: &str, args: &A) -> Result<String> {
    // Round-trip through Value so map keys come out sorted
    let canonical = serde_json::to_vec(&serde_json::to_value(args)?)?;
    let digest = Sha256::digest(&canonical);
    Ok(format!("memo:{}:{}", name, hex::encode(digest)))
}

/// A named computation bound to a cache
pub struct Memoized<'a> {
    cache: &'a CacheOrchestrator,
    name: String,
    ttl: Option<Duration>,
    tags: TagSet,
    tier: CacheTier,
}

impl<'a> Memoized<'a> {
    pub(crate) fn new(cache: &'a CacheOrchestrator, name: impl Into<String>) -> Self {
        Self {
            cache,
            name: name.into(),
            ttl: None,
            tags: TagSet::new(),
            tier: CacheTier::LocalPreferred,
        }
    }

    /// Result TTL (default: the orchestrator's default TTL)
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Tags attached to stored results
    pub fn tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn tier(mut self, tier: CacheTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_for<A: Serialize + ?Sized>(&self, args: &A) -> Result<String> {
        memo_key(&self.name, args)
    }

    /// Return the cached result for `args`, or run `compute` and cache it
    pub async fn call<A, T, F, Fut>(&self, args: &A, compute: F) -> T
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let result: std::result::Result<T, std::convert::Infallible> =
            self.try_call(args, move || async move { Ok(compute().await) }).await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Fallible variant: errors are returned to the caller and not cached
    pub async fn try_call<A, T, E, F, Fut>(&self, args: &A, compute: F) -> std::result::Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let key = match self.key_for(args) {
            Ok(key) => key,
            Err(e) => {
                warn!(name = %self.name, error = %e, "Memo arguments not serializable, calling uncached");
                return self.cache.track(&self.name, compute()).await;
            }
        };

        if let Some(cached) = self.cache.get::<T>(&key, self.tier).await {
            debug!(name = %self.name, key = %key, "Memo hit");
            return Ok(cached);
        }

        let value = self.cache.track(&self.name, compute()).await?;
        self.cache
            .set(&key, &value, self.ttl, &self.tags, self.tier)
            .await;
        Ok(value)
    }
}
