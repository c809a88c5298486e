//! Local Store Maintenance
//!
//! Two background loops run off the request path and touch only the local
//! store:
//!
//! - **expiry purge**: removes up to `batch_size` expired entries per wake-up
//! - **pressure eviction**: when size utilization reaches the high watermark,
//!   evicts idle entries (least recently used first) down to the low
//!   watermark, one bounded batch per wake-up

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::local::LocalStore;
use crate::error::{Error, Result};

/// Maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub purge_interval_secs: u64,
    pub eviction_interval_secs: u64,
    /// Upper bound on entries removed per wake-up
    pub batch_size: usize,
    /// Utilization that triggers pressure eviction
    pub high_watermark: f64,
    /// Utilization pressure eviction stops at
    pub low_watermark: f64,
    /// Entries idle at least this long are evicted first
    pub max_idle_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: 60,
            eviction_interval_secs: 30,
            batch_size: 1000,
            high_watermark: 0.90,
            low_watermark: 0.75,
            max_idle_secs: 300,
        }
    }
}

impl MaintenanceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.purge_interval_secs == 0 || self.eviction_interval_secs == 0 {
            return Err(Error::Config("maintenance intervals must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("maintenance.batch_size must be greater than 0".into()));
        }
        if !(0.0 < self.low_watermark
            && self.low_watermark < self.high_watermark
            && self.high_watermark <= 1.0)
        {
            return Err(Error::Config(format!(
                "maintenance watermarks must satisfy 0 < low ({}) < high ({}) <= 1",
                self.low_watermark, self.high_watermark
            )));
        }
        Ok(())
    }
}

/// Result of one pressure-eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvictionPass {
    pub idle_evicted: usize,
    pub lru_evicted: usize,
    pub utilization_after: f64,
}

impl EvictionPass {
    pub fn total(&self) -> usize {
        self.idle_evicted + self.lru_evicted
    }
}

/// Maintenance worker for one local store
pub struct Maintenance {
    local: Arc<LocalStore>,
    config: MaintenanceConfig,
}

impl Maintenance {
    pub fn new(local: Arc<LocalStore>, config: MaintenanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { local, config })
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Remove one batch of expired entries
    pub fn purge_once(&self) -> usize {
        let purged = self.local.purge_expired(self.config.batch_size);
        if purged > 0 {
            debug!(purged, "Purged expired entries");
        }
        purged
    }

    /// Evict one batch if utilization is at or above the high watermark.
    ///
    /// Idle entries go first; if that is not enough to leave the high
    /// watermark, the rest of the batch falls back to plain LRU.
    pub fn evict_once(&self) -> EvictionPass {
        let utilization = self.local.utilization();
        if utilization < self.config.high_watermark {
            return EvictionPass {
                utilization_after: utilization,
                ..Default::default()
            };
        }

        let target = (self.config.low_watermark * self.local.capacity() as f64) as u64;
        let batch = self.config.batch_size;

        let idle_evicted = self.local.evict_idle(
            Duration::from_secs(self.config.max_idle_secs),
            target,
            batch,
        );

        let mut lru_evicted = 0;
        if self.local.utilization() >= self.config.high_watermark && idle_evicted < batch {
            lru_evicted = self
                .local
                .evict_idle(Duration::ZERO, target, batch - idle_evicted);
        }

        let pass = EvictionPass {
            idle_evicted,
            lru_evicted,
            utilization_after: self.local.utilization(),
        };
        info!(
            utilization_before = utilization,
            utilization_after = pass.utilization_after,
            idle_evicted,
            lru_evicted,
            "Pressure eviction pass"
        );
        pass
    }

    /// Run the expiry purge loop until cancelled
    #[instrument(name = "expiry_purge", skip_all)]
    pub async fn run_purge(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = interval(Duration::from_secs(self.config.purge_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.purge_interval_secs, "Expiry purge started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.purge_once();
                }
            }
        }
        info!("Expiry purge stopped");
    }

    /// Run the pressure eviction loop until cancelled
    #[instrument(name = "pressure_eviction", skip_all)]
    pub async fn run_eviction(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = interval(Duration::from_secs(self.config.eviction_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.eviction_interval_secs,
            high_watermark = self.config.high_watermark,
            "Pressure eviction started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.evict_once();
                }
            }
        }
        info!("Pressure eviction stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::TagSet;
    use crate::cache::local::LocalStoreConfig;
    use bytes::Bytes;

    fn local(max_size_bytes: u64) -> Arc<LocalStore> {
        Arc::new(
            LocalStore::standalone(LocalStoreConfig {
                max_size_bytes,
                max_entries: 10_000,
                shard_count: 4,
            })
            .unwrap(),
        )
    }

    fn fill(local: &LocalStore, count: usize, size: usize, ttl: Option<Duration>) {
        for i in 0..count {
            local.set(&format!("k{:03}", i), Bytes::from(vec![0u8; size]), ttl, TagSet::new());
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(MaintenanceConfig::default().validate().is_ok());

        let inverted = MaintenanceConfig {
            high_watermark: 0.5,
            low_watermark: 0.8,
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(Error::Config(_))));

        let zero_batch = MaintenanceConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(zero_batch.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_once_is_bounded() {
        let store = local(1_000_000);
        fill(&store, 30, 10, Some(Duration::from_secs(1)));
        let maintenance = Maintenance::new(
            Arc::clone(&store),
            MaintenanceConfig {
                batch_size: 10,
                ..Default::default()
            },
        )
        .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(maintenance.purge_once(), 10);
        assert_eq!(store.len(), 20);
        assert_eq!(maintenance.purge_once(), 10);
        assert_eq!(maintenance.purge_once(), 10);
        assert!(store.is_empty());
    }

    #[test]
    fn test_no_eviction_below_high_watermark() {
        let store = local(1000);
        fill(&store, 5, 100, None);

        let maintenance = Maintenance::new(Arc::clone(&store), MaintenanceConfig::default()).unwrap();
        let pass = maintenance.evict_once();

        assert_eq!(pass.total(), 0);
        assert_eq!(store.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pressure_eviction_prefers_idle_entries() {
        let store = local(1000);
        fill(&store, 10, 95, None);

        tokio::time::advance(Duration::from_secs(600)).await;
        // Recently used entries survive
        for i in 5..10 {
            store.get(&format!("k{:03}", i));
        }

        let maintenance = Maintenance::new(Arc::clone(&store), MaintenanceConfig::default()).unwrap();
        let pass = maintenance.evict_once();

        assert_eq!(pass.idle_evicted, 3);
        assert_eq!(pass.lru_evicted, 0);
        assert!(pass.utilization_after <= 0.75);
        for i in 5..10 {
            assert!(store.contains(&format!("k{:03}", i)));
        }
    }

    #[test]
    fn test_pressure_eviction_falls_back_to_lru() {
        let store = local(1000);
        // Nothing idle yet
        fill(&store, 10, 95, None);

        let maintenance = Maintenance::new(Arc::clone(&store), MaintenanceConfig::default()).unwrap();
        let pass = maintenance.evict_once();

        assert_eq!(pass.idle_evicted, 0);
        assert_eq!(pass.lru_evicted, 3);
        assert_eq!(store.len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_stop_on_cancel() {
        let store = local(1000);
        let maintenance = Arc::new(Maintenance::new(store, MaintenanceConfig::default()).unwrap());
        let token = CancellationToken::new();

        let purge = tokio::spawn(Arc::clone(&maintenance).run_purge(token.clone()));
        let evict = tokio::spawn(Arc::clone(&maintenance).run_eviction(token.clone()));

        tokio::time::advance(Duration::from_secs(120)).await;
        token.cancel();

        purge.await.unwrap();
        evict.await.unwrap();
    }
}
