//! Performance Sampler
//!
//! Once per tick the sampler reads host resources, aggregates the sample
//! window and cache statistics into one [`PerformanceSnapshot`], appends it
//! to a bounded history and hands it to the alert engine. It only reads
//! from the stores and never waits on a cache operation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::collector::MetricsCollector;
use super::resources::{ResourceReader, ResourceUsage};
use super::sample::{summarize_by_operation, LatencySummary, SampleWindow};
use crate::alerting::AlertEngine;
use crate::cache::{CacheStatistics, StatisticsSnapshot};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_secs: u64,
    /// Latency aggregation window
    pub window_secs: u64,
    /// Snapshot history age bound
    pub history_secs: u64,
    /// Snapshot history count bound
    pub max_history: usize,
    /// Time limit for one resource reading
    pub read_timeout_ms: u64,
    /// Operations ranked in `slowest_operations`
    pub slowest_count: usize,
    /// Sample window count bound
    pub max_samples: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            window_secs: 300,
            history_secs: 3600,
            max_history: 720,
            read_timeout_ms: 5000,
            slowest_count: 5,
            max_samples: 10_000,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 || self.window_secs == 0 || self.history_secs == 0 {
            return Err(Error::Config("sampler intervals and windows must be greater than 0".into()));
        }
        if self.max_history == 0 || self.max_samples == 0 {
            return Err(Error::Config("sampler.max_history and sampler.max_samples must be greater than 0".into()));
        }
        if self.read_timeout_ms == 0 {
            return Err(Error::Config("sampler.read_timeout_ms must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time view of engine health
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub captured_at: DateTime<Utc>,
    /// Over every operation in the window
    pub latency: LatencySummary,
    pub operations: BTreeMap<String, LatencySummary>,
    /// Operation names by descending average latency
    pub slowest_operations: Vec<String>,
    /// `None` until the first cache read
    pub hit_rate: Option<f64>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub in_flight: u64,
    pub error_rate: f64,
    /// Business gauges
    pub custom: BTreeMap<String, f64>,
    pub cache: StatisticsSnapshot,
}

// =============================================================================
// Sampler
// =============================================================================

pub struct Sampler {
    config: SamplerConfig,
    stats: Arc<CacheStatistics>,
    samples: Arc<SampleWindow>,
    metrics: Arc<MetricsCollector>,
    reader: Arc<dyn ResourceReader>,
    latest: RwLock<Option<Arc<PerformanceSnapshot>>>,
    history: Mutex<VecDeque<(Instant, Arc<PerformanceSnapshot>)>>,
    skipped_ticks: AtomicU64,
}

impl Sampler {
    pub fn new(
        config: SamplerConfig,
        stats: Arc<CacheStatistics>,
        samples: Arc<SampleWindow>,
        metrics: Arc<MetricsCollector>,
        reader: Arc<dyn ResourceReader>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            stats,
            samples,
            metrics,
            reader,
            latest: RwLock::new(None),
            history: Mutex::new(VecDeque::new()),
            skipped_ticks: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Take one snapshot. Returns `None` when the resource reading fails or
    /// runs past its time limit; the tick is skipped.
    pub async fn tick(&self) -> Option<Arc<PerformanceSnapshot>> {
        let timeout = self.config.read_timeout();
        let usage = match tokio::time::timeout(timeout, self.reader.read()).await {
            Ok(Ok(usage)) => usage,
            Ok(Err(e)) => {
                warn!(error = %e, "Resource read failed, skipping sample tick");
                self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.config.read_timeout_ms, "Resource read timed out, skipping sample tick");
                self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let snapshot = Arc::new(self.compute(usage));
        self.append(Arc::clone(&snapshot));
        debug!(
            samples = snapshot.latency.count,
            avg_ms = snapshot.latency.avg_ms,
            hit_rate = ?snapshot.hit_rate,
            "Performance snapshot taken"
        );
        Some(snapshot)
    }

    /// Build a snapshot from the current window, statistics and gauges
    pub fn compute(&self, usage: ResourceUsage) -> PerformanceSnapshot {
        let recent = self.samples.recent(self.config.window());
        let latency = LatencySummary::from_samples(&recent);
        let operations = summarize_by_operation(&recent);

        let mut ranked: Vec<(&String, f64)> = operations.iter().map(|(op, s)| (op, s.avg_ms)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let slowest_operations = ranked
            .into_iter()
            .take(self.config.slowest_count)
            .map(|(op, _)| op.clone())
            .collect();

        let cache = self.stats.snapshot();
        PerformanceSnapshot {
            captured_at: Utc::now(),
            error_rate: latency.error_rate(),
            latency,
            operations,
            slowest_operations,
            hit_rate: cache.hit_rate,
            cpu_percent: usage.cpu_percent,
            memory_percent: usage.memory_percent,
            in_flight: self.samples.in_flight(),
            custom: self.metrics.gauges(),
            cache,
        }
    }

    fn append(&self, snapshot: Arc<PerformanceSnapshot>) {
        let now = Instant::now();
        let max_age = Duration::from_secs(self.config.history_secs);

        let mut history = self.history.lock();
        history.push_back((now, Arc::clone(&snapshot)));
        while history.len() > self.config.max_history {
            history.pop_front();
        }
        while history
            .front()
            .is_some_and(|(at, _)| now.saturating_duration_since(*at) > max_age)
        {
            history.pop_front();
        }
        drop(history);

        *self.latest.write() = Some(snapshot);
    }

    pub fn latest(&self) -> Option<Arc<PerformanceSnapshot>> {
        self.latest.read().clone()
    }

    /// Retained snapshots, oldest first
    pub fn history(&self) -> Vec<Arc<PerformanceSnapshot>> {
        self.history.lock().iter().map(|(_, s)| Arc::clone(s)).collect()
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    /// Sample every interval and feed the alert engine until cancelled
    #[instrument(name = "sampler", skip_all)]
    pub async fn run(self: Arc<Self>, alerts: Arc<AlertEngine>, shutdown: CancellationToken) {
        let mut tick = interval(Duration::from_secs(self.config.interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.config.interval_secs, "Sampler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    if let Some(snapshot) = self.tick().await {
                        let outcome = alerts.evaluate(&snapshot);
                        if !outcome.created.is_empty() || !outcome.resolved.is_empty() {
                            info!(
                                created = outcome.created.len(),
                                resolved = outcome.resolved.len(),
                                "Alert state changed"
                            );
                        }
                    }
                }
            }
        }
        info!("Sampler stopped");
    }
}
