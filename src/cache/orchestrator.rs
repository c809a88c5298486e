//! Cache Orchestrator - Unified Two-Tier Cache
//!
//! Fronts the local store and the optional shared store behind one
//! get/set/delete/invalidate interface. Values are serialized to JSON once
//! and the same payload goes to both tiers.
//!
//! # Tiers
//!
//! ```text
//!   Local           local store only
//!   Shared          shared store only
//!   LocalPreferred  local first, shared on miss (promoting hits locally);
//!                   writes go to both
//! ```
//!
//! Every lookup records exactly one hit or miss in [`CacheStatistics`] and
//! one `cache.get` sample.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::entry::TagSet;
use super::local::LocalStore;
use super::memo::Memoized;
use super::shared::{SharedLookup, SharedStore};
use super::stats::CacheStatistics;
use crate::error::{Error, Result};
use crate::monitoring::sample::SampleWindow;

/// Cache tier selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// In-process store only
    Local,
    /// Distributed store only
    Shared,
    /// Local first, falling back to shared
    #[default]
    LocalPreferred,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::Local => write!(f, "local"),
            CacheTier::Shared => write!(f, "shared"),
            CacheTier::LocalPreferred => write!(f, "local_preferred"),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// TTL applied when a caller supplies none
    pub default_ttl_secs: u64,
    /// Copy shared hits into the local store
    pub promote_on_shared_hit: bool,
    /// Upper bound on a promoted entry's local TTL
    pub promotion_ttl_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            promote_on_shared_hit: true,
            promotion_ttl_secs: 60,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 {
            return Err(Error::Config("orchestrator.default_ttl_secs must be greater than 0".into()));
        }
        if self.promotion_ttl_secs == 0 {
            return Err(Error::Config("orchestrator.promotion_ttl_secs must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn promotion_ttl(&self) -> Duration {
        Duration::from_secs(self.promotion_ttl_secs)
    }
}

/// Where a lookup found its payload
enum Found {
    Local(Bytes),
    Shared(Bytes),
    Absent,
    Failed,
}

/// Unified cache orchestrator
pub struct CacheOrchestrator {
    local: Arc<LocalStore>,
    shared: Option<Arc<SharedStore>>,
    stats: Arc<CacheStatistics>,
    samples: Arc<SampleWindow>,
    config: OrchestratorConfig,
}

impl CacheOrchestrator {
    pub fn new(
        local: Arc<LocalStore>,
        shared: Option<Arc<SharedStore>>,
        samples: Arc<SampleWindow>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            stats: Arc::clone(local.statistics()),
            local,
            shared,
            samples,
            config,
        })
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn shared(&self) -> Option<&Arc<SharedStore>> {
        self.shared.as_ref()
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.stats
    }

    pub fn samples(&self) -> &Arc<SampleWindow> {
        &self.samples
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get and deserialize a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str, tier: CacheTier) -> Option<T> {
        self.get_with(key, tier, |payload| {
            serde_json::from_slice(payload).map_err(Error::from)
        })
        .await
    }

    /// Get the serialized JSON payload
    pub async fn get_raw(&self, key: &str, tier: CacheTier) -> Option<Bytes> {
        self.get_with(key, tier, |payload| Ok(payload.clone())).await
    }

    async fn get_with<T>(
        &self,
        key: &str,
        tier: CacheTier,
        decode: impl FnOnce(&Bytes) -> Result<T>,
    ) -> Option<T> {
        let timer = self.samples.start("cache.get");

        let (value, error_kind) = match self.fetch(key, tier).await {
            Found::Local(payload) => match decode(&payload) {
                Ok(value) => {
                    self.stats.record_local_hit();
                    (Some(value), None)
                }
                Err(e) => {
                    self.local.delete(key);
                    self.record_undecodable(key, &e);
                    (None, Some(e.kind()))
                }
            },
            Found::Shared(payload) => match decode(&payload) {
                Ok(value) => {
                    self.stats.record_shared_hit();
                    if tier == CacheTier::LocalPreferred && self.config.promote_on_shared_hit {
                        self.promote(key, payload).await;
                    }
                    (Some(value), None)
                }
                Err(e) => {
                    self.record_undecodable(key, &e);
                    (None, Some(e.kind()))
                }
            },
            Found::Absent => {
                self.stats.record_miss();
                (None, None)
            }
            Found::Failed => {
                self.stats.record_miss();
                (None, Some("shared_store"))
            }
        };

        timer.finish(error_kind);
        value
    }

    async fn fetch(&self, key: &str, tier: CacheTier) -> Found {
        if tier != CacheTier::Shared {
            if let Some(payload) = self.local.get(key) {
                return Found::Local(payload);
            }
            if tier == CacheTier::Local {
                return Found::Absent;
            }
        }

        let Some(shared) = &self.shared else {
            return Found::Absent;
        };
        match shared.lookup(key).await {
            SharedLookup::Hit(payload) => Found::Shared(payload),
            SharedLookup::Miss => Found::Absent,
            SharedLookup::Degraded => Found::Failed,
        }
    }

    fn record_undecodable(&self, key: &str, error: &Error) {
        self.stats.record_miss();
        warn!(key = %key, error = %error, "Cached payload could not be deserialized, treating as miss");
    }

    /// Copy a shared hit into the local store. The local copy never outlives
    /// the shared entry and is capped at the promotion TTL.
    async fn promote(&self, key: &str, payload: Bytes) {
        let Some(shared) = &self.shared else {
            return;
        };
        let remaining = match shared.remaining_ttl(key).await {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => {
                debug!(key = %key, "Shared entry has no remaining TTL, not promoted");
                return;
            }
        };

        let ttl = remaining.min(self.config.promotion_ttl());
        if self.local.set(key, payload, Some(ttl), TagSet::new()) {
            self.stats.record_promotion();
            debug!(key = %key, ttl_secs = ttl.as_secs(), "Promoted shared hit to local store");
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Serialize and store a value.
    ///
    /// `ttl` of `None` applies the configured default. A zero TTL is not
    /// cached. For `LocalPreferred` the write succeeds if either tier
    /// accepted it.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &TagSet,
        tier: CacheTier,
    ) -> bool {
        let timer = self.samples.start("cache.set");

        let payload = match serde_json::to_vec(value) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize value, not cached");
                self.stats.record_set(false);
                timer.finish(Some("serialization"));
                return false;
            }
        };

        let ok = self.store(key, payload, ttl, tags, tier).await;
        self.stats.record_set(ok);
        timer.finish((!ok).then_some("set_failed"));
        ok
    }

    /// Store an already serialized JSON payload
    pub async fn set_raw(&self, key: &str, payload: Bytes, ttl: Option<Duration>, tags: &TagSet, tier: CacheTier) -> bool {
        let timer = self.samples.start("cache.set");
        let ok = self.store(key, payload, ttl, tags, tier).await;
        self.stats.record_set(ok);
        timer.finish((!ok).then_some("set_failed"));
        ok
    }

    async fn store(&self, key: &str, payload: Bytes, ttl: Option<Duration>, tags: &TagSet, tier: CacheTier) -> bool {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        if ttl.is_zero() {
            debug!(key = %key, "Zero TTL, not cached");
            return false;
        }

        let local_ok = match tier {
            CacheTier::Shared => false,
            CacheTier::Local | CacheTier::LocalPreferred => {
                self.local.set(key, payload.clone(), Some(ttl), tags.clone())
            }
        };

        let shared_ok = match (&self.shared, tier) {
            (Some(shared), CacheTier::Shared | CacheTier::LocalPreferred) => {
                shared.set(key, &payload, ttl, tags).await
            }
            _ => false,
        };

        local_ok || shared_ok
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Delete a key from the selected tier(s)
    pub async fn delete(&self, key: &str, tier: CacheTier) -> bool {
        let timer = self.samples.start("cache.delete");

        let local_removed = tier != CacheTier::Shared && self.local.delete(key);
        let shared_removed = match (&self.shared, tier) {
            (Some(shared), CacheTier::Shared | CacheTier::LocalPreferred) => shared.delete(key).await,
            _ => false,
        };

        let removed = local_removed || shared_removed;
        if removed {
            self.stats.record_delete();
        }
        timer.finish(None);
        removed
    }

    /// Delete every entry carrying any of `tags` from the selected tier(s).
    ///
    /// Shared-tier members are also removed locally, which covers entries
    /// promoted without their tags.
    pub async fn invalidate_by_tags(&self, tags: &TagSet, tier: CacheTier) -> usize {
        let timer = self.samples.start("cache.invalidate");
        let mut removed = 0;

        if tier != CacheTier::Shared {
            removed += self.local.delete_by_tags(tags);
        }

        if let (Some(shared), CacheTier::Shared | CacheTier::LocalPreferred) = (&self.shared, tier) {
            let invalidated = shared.remove_tagged(tags).await;
            removed += invalidated.removed;
            if tier == CacheTier::LocalPreferred {
                for key in &invalidated.keys {
                    self.local.delete(key);
                }
            }
        }

        debug!(?tags, %tier, removed, "Invalidated by tags");
        timer.finish(None);
        removed
    }

    // =========================================================================
    // Wrappers
    // =========================================================================

    /// Time an arbitrary unit of work and record it as `operation`
    pub async fn track<F, T, E>(&self, operation: &str, work: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
    {
        let timer = self.samples.start(operation);
        let result = work.await;
        timer.finish(result.as_ref().err().map(|_| "error"));
        result
    }

    /// Memoizing wrapper for the computation called `name`
    pub fn memoize(&self, name: impl Into<String>) -> Memoized<'_> {
        Memoized::new(self, name)
    }
}
