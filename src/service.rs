//! Cache Engine
//!
//! Explicitly constructed owner of every component. Background workers
//! (expiry purge, pressure eviction, sampling) start in
//! [`CacheEngine::initialize`] and stop in [`CacheEngine::shutdown`], so
//! each test can build an isolated engine.
//!
//! ```text
//!   CacheEngineBuilder ──build──► CacheEngine
//!                                   ├── CacheOrchestrator ── LocalStore / SharedStore
//!                                   ├── Maintenance ─────── expiry_purge, pressure_eviction
//!                                   ├── Sampler ─────────── sampler ──► AlertEngine ──► sinks
//!                                   ├── MetricsCollector
//!                                   └── PrometheusExporter / HealthCheck
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerting::{recommend, Alert, AlertEngine, AlertSink, LoggingAlertSink, RecommendationThresholds};
use crate::cache::{
    CacheOrchestrator, CacheStatistics, LocalStore, Maintenance, RedisSharedBackend, SharedBackend, SharedStore,
    StatisticsSnapshot,
};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::monitoring::health::{check_alerts, check_local_store, check_sampler, check_shared_store};
use crate::monitoring::{
    ExportState, HealthCheck, HealthResponse, MetricsCollector, PerformanceSnapshot, PrometheusExporter,
    ResourceReader, SampleWindow, Sampler, SystemResourceReader,
};

/// Point-in-time report for operators
#[derive(Debug, Clone, Serialize)]
pub struct EngineReport {
    pub generated_at: DateTime<Utc>,
    pub statistics: StatisticsSnapshot,
    pub snapshot: Option<PerformanceSnapshot>,
    pub active_alerts: Vec<Alert>,
    pub recommendations: Vec<String>,
}

// =============================================================================
// Builder
// =============================================================================

pub struct CacheEngineBuilder {
    config: EngineConfig,
    backend: Option<Arc<dyn SharedBackend>>,
    reader: Option<Arc<dyn ResourceReader>>,
    sinks: Vec<Arc<dyn AlertSink>>,
    metrics: Option<Arc<MetricsCollector>>,
    thresholds: RecommendationThresholds,
}

impl CacheEngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            backend: None,
            reader: None,
            sinks: Vec::new(),
            metrics: None,
            thresholds: RecommendationThresholds::default(),
        }
    }

    /// Use this backend instead of the one named by `redis_url`
    pub fn shared_backend(mut self, backend: Arc<dyn SharedBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn resource_reader(mut self, reader: Arc<dyn ResourceReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn recommendation_thresholds(mut self, thresholds: RecommendationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn build(self) -> Result<CacheEngine> {
        let config = self.config;
        config.validate()?;

        let stats = Arc::new(CacheStatistics::new());
        let local = Arc::new(LocalStore::new(config.local.clone(), Arc::clone(&stats))?);

        let backend = match (self.backend, &config.redis_url) {
            (Some(backend), _) => Some(backend),
            (None, Some(url)) => Some(Arc::new(RedisSharedBackend::from_url(url)?) as Arc<dyn SharedBackend>),
            (None, None) => None,
        };
        let shared = backend
            .map(|backend| SharedStore::new(backend, config.shared.clone(), Arc::clone(&stats)).map(Arc::new))
            .transpose()?;

        let samples = Arc::new(SampleWindow::new(config.sampler.window(), config.sampler.max_samples));
        let cache = Arc::new(CacheOrchestrator::new(
            Arc::clone(&local),
            shared,
            Arc::clone(&samples),
            config.orchestrator.clone(),
        )?);
        let maintenance = Arc::new(Maintenance::new(local, config.maintenance.clone())?);

        let mut sinks = self.sinks;
        if sinks.is_empty() {
            sinks.push(Arc::new(LoggingAlertSink::info_level()));
        }
        let alerts = Arc::new(AlertEngine::new(config.alerts.clone(), sinks)?);

        let metrics = self.metrics.unwrap_or_default();
        let reader = match self.reader {
            Some(reader) => reader,
            None => Arc::new(SystemResourceReader::new()),
        };
        let sampler = Arc::new(Sampler::new(
            config.sampler.clone(),
            stats,
            samples,
            Arc::clone(&metrics),
            reader,
        )?);

        Ok(CacheEngine {
            config,
            cache,
            maintenance,
            sampler,
            alerts,
            metrics,
            exporter: PrometheusExporter::new()?,
            health: HealthCheck::new(),
            thresholds: self.thresholds,
            running: Mutex::new(None),
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

struct Running {
    shutdown: CancellationToken,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct CacheEngine {
    config: EngineConfig,
    cache: Arc<CacheOrchestrator>,
    maintenance: Arc<Maintenance>,
    sampler: Arc<Sampler>,
    alerts: Arc<AlertEngine>,
    metrics: Arc<MetricsCollector>,
    exporter: PrometheusExporter,
    health: HealthCheck,
    thresholds: RecommendationThresholds,
    running: Mutex<Option<Running>>,
}

impl CacheEngine {
    pub fn builder(config: EngineConfig) -> CacheEngineBuilder {
        CacheEngineBuilder::new(config)
    }

    /// Engine with default configuration and no shared tier
    pub fn local_only() -> Result<Self> {
        CacheEngineBuilder::new(EngineConfig::default()).build()
    }

    /// Start the background workers. Calling it on a running engine is a
    /// no-op.
    pub async fn initialize(&self) -> Result<()> {
        if self.running.lock().is_some() {
            warn!("Cache engine already initialized");
            return Ok(());
        }

        if let Some(shared) = self.cache.shared() {
            match shared.ping().await {
                Ok(()) => info!(backend = shared.backend_name(), "Shared store reachable"),
                Err(e) => warn!(
                    backend = shared.backend_name(),
                    error = %e,
                    "Shared store unreachable, continuing with local tier"
                ),
            }
        }

        let shutdown = CancellationToken::new();
        let workers = vec![
            (
                "expiry_purge",
                tokio::spawn(Arc::clone(&self.maintenance).run_purge(shutdown.clone())),
            ),
            (
                "pressure_eviction",
                tokio::spawn(Arc::clone(&self.maintenance).run_eviction(shutdown.clone())),
            ),
            (
                "sampler",
                tokio::spawn(Arc::clone(&self.sampler).run(Arc::clone(&self.alerts), shutdown.clone())),
            ),
        ];

        let mut running = self.running.lock();
        if running.is_some() {
            // Lost a race with a concurrent initialize
            shutdown.cancel();
            return Ok(());
        }
        *running = Some(Running { shutdown, workers });
        drop(running);

        self.health.set_ready(true);
        info!(
            shared_tier = self.cache.shared().is_some(),
            max_entries = self.config.local.max_entries,
            max_size_bytes = self.config.local.max_size_bytes,
            "Cache engine initialized"
        );
        Ok(())
    }

    /// Stop the background workers and wait for them to finish
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        self.health.set_ready(false);
        running.shutdown.cancel();
        for (name, handle) in running.workers {
            if let Err(e) = handle.await {
                error!(worker = name, error = %e, "Worker terminated abnormally");
            }
        }
        info!("Cache engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Take a snapshot and evaluate alerts now, outside the sampling period
    pub async fn tick(&self) -> Option<Arc<PerformanceSnapshot>> {
        let snapshot = self.sampler.tick().await?;
        self.alerts.evaluate(&snapshot);
        Some(snapshot)
    }

    pub fn report(&self) -> EngineReport {
        let snapshot = self.sampler.latest();
        let recommendations = snapshot
            .as_deref()
            .map(|s| recommend(s, self.config.local.max_size_bytes, &self.thresholds))
            .unwrap_or_default();

        EngineReport {
            generated_at: Utc::now(),
            statistics: self.cache.statistics().snapshot(),
            snapshot: snapshot.map(|s| (*s).clone()),
            active_alerts: self.alerts.active(),
            recommendations,
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let mut components = Vec::new();
        if let Some(shared) = self.cache.shared() {
            components.push(check_shared_store(shared).await);
        }
        components.push(check_local_store(self.cache.local(), self.config.maintenance.high_watermark));
        if self.is_running() {
            let max_age = Duration::from_secs(self.config.sampler.interval_secs * 3);
            components.push(check_sampler(&self.sampler, max_age));
        }
        components.push(check_alerts(&self.alerts.active()));
        self.health.report(components)
    }

    pub fn liveness(&self) -> &HealthCheck {
        &self.health
    }

    /// Prometheus text exposition; returns `(content_type, body)`
    pub fn metrics_text(&self) -> Result<(String, Vec<u8>)> {
        let statistics = self.cache.statistics().snapshot();
        let snapshot = self.sampler.latest();
        let active = self.alerts.active();
        self.exporter.update(&ExportState {
            statistics: &statistics,
            snapshot: snapshot.as_deref(),
            active_alerts: &active,
            notifications_failed: self.alerts.notifications_failed(),
            skipped_ticks: self.sampler.skipped_ticks(),
        });
        self.exporter.encode()
    }

    pub fn cache(&self) -> &Arc<CacheOrchestrator> {
        &self.cache
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.sampler
    }

    pub fn maintenance(&self) -> &Arc<Maintenance> {
        &self.maintenance
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.cancel();
        }
    }
}
