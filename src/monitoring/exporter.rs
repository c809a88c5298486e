//! Prometheus Exposition
//!
//! Each engine owns its own [`Registry`]; values are refreshed from the
//! statistics, latest snapshot and alert list right before a scrape.

use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use super::sampler::PerformanceSnapshot;
use crate::alerting::{Alert, AlertSeverity};
use crate::cache::StatisticsSnapshot;
use crate::error::{Error, Result};

const NAMESPACE: &str = "tierwatch";

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus registry error: {}", e))
}

/// Inputs for one refresh
pub struct ExportState<'a> {
    pub statistics: &'a StatisticsSnapshot,
    pub snapshot: Option<&'a PerformanceSnapshot>,
    pub active_alerts: &'a [Alert],
    pub notifications_failed: u64,
    pub skipped_ticks: u64,
}

pub struct PrometheusExporter {
    registry: Registry,

    lookups: IntCounterVec,
    evictions: IntCounter,
    expirations: IntCounter,
    sets: IntCounter,
    set_failures: IntCounter,
    deletes: IntCounter,
    shared_errors: IntCounter,
    promotions: IntCounter,
    notifications_failed: IntCounter,
    skipped_ticks: IntCounter,

    size_bytes: IntGauge,
    entries: IntGauge,
    in_flight: IntGauge,
    hit_rate: Gauge,
    latency_ms: prometheus::GaugeVec,
    cpu_percent: Gauge,
    memory_percent: Gauge,
    active_alerts: IntGaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(prom_err)?;
            registry.register(Box::new(c.clone())).map_err(prom_err)?;
            Ok(c)
        };
        let int_gauge = |name: &str, help: &str| -> Result<IntGauge> {
            let g = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(prom_err)?;
            registry.register(Box::new(g.clone())).map_err(prom_err)?;
            Ok(g)
        };
        let gauge = |name: &str, help: &str| -> Result<Gauge> {
            let g = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE)).map_err(prom_err)?;
            registry.register(Box::new(g.clone())).map_err(prom_err)?;
            Ok(g)
        };

        let lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Cache lookups by result").namespace(NAMESPACE),
            &["result"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(lookups.clone())).map_err(prom_err)?;

        let latency_ms = prometheus::GaugeVec::new(
            Opts::new("latency_ms", "Operation latency over the sampling window").namespace(NAMESPACE),
            &["quantile"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(latency_ms.clone())).map_err(prom_err)?;

        let active_alerts = IntGaugeVec::new(
            Opts::new("alerts_active", "Unresolved alerts by severity").namespace(NAMESPACE),
            &["severity"],
        )
        .map_err(prom_err)?;
        registry.register(Box::new(active_alerts.clone())).map_err(prom_err)?;

        Ok(Self {
            evictions: counter("cache_evictions_total", "Local store capacity evictions")?,
            expirations: counter("cache_expirations_total", "Local store entries removed after expiry")?,
            sets: counter("cache_sets_total", "Successful cache writes")?,
            set_failures: counter("cache_set_failures_total", "Rejected cache writes")?,
            deletes: counter("cache_deletes_total", "Cache deletions")?,
            shared_errors: counter("shared_store_errors_total", "Shared store failures and timeouts")?,
            promotions: counter("cache_promotions_total", "Shared hits copied into the local store")?,
            notifications_failed: counter("alert_notifications_failed_total", "Failed alert deliveries")?,
            skipped_ticks: counter("sampler_skipped_ticks_total", "Sampler ticks skipped on resource read failure")?,
            size_bytes: int_gauge("local_store_size_bytes", "Local store resident bytes")?,
            entries: int_gauge("local_store_entries", "Local store resident entries")?,
            in_flight: int_gauge("operations_in_flight", "Tracked operations currently running")?,
            hit_rate: gauge("cache_hit_rate", "Cache hit rate since start")?,
            cpu_percent: gauge("host_cpu_percent", "Host CPU utilization")?,
            memory_percent: gauge("host_memory_percent", "Host memory utilization")?,
            lookups,
            latency_ms,
            active_alerts,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn update(&self, state: &ExportState<'_>) {
        let s = state.statistics;
        advance(&self.lookups.with_label_values(&["local_hit"]), s.local_hits);
        advance(&self.lookups.with_label_values(&["shared_hit"]), s.shared_hits);
        advance(&self.lookups.with_label_values(&["miss"]), s.misses);
        advance(&self.evictions, s.evictions);
        advance(&self.expirations, s.expirations);
        advance(&self.sets, s.sets);
        advance(&self.set_failures, s.set_failures);
        advance(&self.deletes, s.deletes);
        advance(&self.shared_errors, s.shared_errors);
        advance(&self.promotions, s.promotions);
        advance(&self.notifications_failed, state.notifications_failed);
        advance(&self.skipped_ticks, state.skipped_ticks);

        self.size_bytes.set(s.size_bytes as i64);
        self.entries.set(s.entries as i64);
        self.hit_rate.set(s.hit_rate.unwrap_or(0.0));

        if let Some(snapshot) = state.snapshot {
            self.in_flight.set(snapshot.in_flight as i64);
            self.latency_ms.with_label_values(&["avg"]).set(snapshot.latency.avg_ms);
            self.latency_ms.with_label_values(&["p95"]).set(snapshot.latency.p95_ms);
            self.latency_ms.with_label_values(&["p99"]).set(snapshot.latency.p99_ms);
            self.cpu_percent.set(snapshot.cpu_percent);
            self.memory_percent.set(snapshot.memory_percent);
        }

        for severity in [AlertSeverity::Info, AlertSeverity::Warning, AlertSeverity::Critical] {
            let count = state.active_alerts.iter().filter(|a| a.severity == severity).count();
            self.active_alerts
                .with_label_values(&[&severity.to_string()])
                .set(count as i64);
        }
    }

    /// Text exposition format; returns `(content_type, body)`
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

/// Move a Prometheus counter up to an externally tracked total
fn advance(counter: &IntCounter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
