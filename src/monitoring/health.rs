//! Health Checks
//!
//! Liveness and readiness probes plus component checks for the cache
//! engine. The shared tier is optional for correctness (the cache fails
//! open), so an unreachable shared store only degrades health.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::sampler::Sampler;
use crate::alerting::{Alert, AlertSeverity};
use crate::cache::{LocalStore, SharedStore};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// Operational with reduced capability
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Result of one component check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
            duration_ms: 0,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

// =============================================================================
// Component Checks
// =============================================================================

/// Ping the shared store
pub async fn check_shared_store(shared: &SharedStore) -> HealthCheckResult {
    let started = Instant::now();
    let result = match shared.ping().await {
        Ok(()) => HealthCheckResult::healthy("shared_store"),
        Err(e) => HealthCheckResult::degraded(
            "shared_store",
            format!("{} backend unreachable: {}", shared.backend_name(), e),
        ),
    };
    result.with_duration(started.elapsed())
}

/// Flag a local store running above `high_watermark` utilization
pub fn check_local_store(local: &LocalStore, high_watermark: f64) -> HealthCheckResult {
    let utilization = local.utilization();
    if utilization >= high_watermark {
        HealthCheckResult::degraded(
            "local_store",
            format!("utilization {:.1}% at or above {:.1}%", utilization * 100.0, high_watermark * 100.0),
        )
    } else {
        HealthCheckResult::healthy("local_store")
    }
}

/// Flag a sampler whose latest snapshot is older than `max_age`
pub fn check_sampler(sampler: &Sampler, max_age: Duration) -> HealthCheckResult {
    match sampler.latest() {
        None => HealthCheckResult::degraded("sampler", "no snapshot taken yet"),
        Some(snapshot) => {
            let age = chrono::Utc::now().signed_duration_since(snapshot.captured_at);
            match age.to_std() {
                Ok(age) if age > max_age => {
                    HealthCheckResult::degraded("sampler", format!("latest snapshot is {}s old", age.as_secs()))
                }
                _ => HealthCheckResult::healthy("sampler"),
            }
        }
    }
}

/// Degrade while any critical alert is unresolved
pub fn check_alerts(active: &[Alert]) -> HealthCheckResult {
    let critical = active.iter().filter(|a| a.severity == AlertSeverity::Critical).count();
    if critical > 0 {
        HealthCheckResult::degraded("alerts", format!("{} critical alert(s) unresolved", critical))
    } else {
        HealthCheckResult::healthy("alerts")
    }
}

// =============================================================================
// Probe State
// =============================================================================

/// Liveness/readiness flags owned by the engine lifecycle
pub struct HealthCheck {
    start_time: Instant,
    live: AtomicBool,
    ready: AtomicBool,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Relaxed)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    pub fn liveness_check(&self) -> HealthCheckResult {
        if self.is_live() {
            HealthCheckResult::healthy("liveness")
        } else {
            HealthCheckResult::unhealthy("liveness", "Engine stopped")
        }
    }

    pub fn readiness_check(&self) -> HealthCheckResult {
        if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "Engine not initialized")
        }
    }

    /// Combine the probe flags with component checks
    pub fn report(&self, components: Vec<HealthCheckResult>) -> HealthResponse {
        let mut checks = vec![self.liveness_check(), self.readiness_check()];
        checks.extend(components);
        HealthResponse::new(checks, self.uptime())
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStatistics, InMemorySharedBackend, LocalStoreConfig, SharedStoreConfig, TagSet};
    use bytes::Bytes;
    use std::sync::Arc;

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded.is_operational());
        assert!(!HealthStatus::Degraded.is_healthy());
        assert!(!HealthStatus::Unhealthy.is_operational());
        assert!(HealthStatus::Unhealthy > HealthStatus::Degraded);
    }

    #[test]
    fn test_response_takes_worst_status() {
        let checks = vec![
            HealthCheckResult::healthy("a"),
            HealthCheckResult::degraded("b", "slow"),
        ];
        let response = HealthResponse::new(checks, Duration::from_secs(60));
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.uptime_seconds, 60);
    }

    #[test]
    fn test_probe_flags() {
        let health = HealthCheck::new();
        assert!(health.is_live());
        assert!(!health.is_ready());
        assert_eq!(health.report(Vec::new()).status, HealthStatus::Unhealthy);

        health.set_ready(true);
        assert_eq!(health.report(Vec::new()).status, HealthStatus::Healthy);

        health.set_live(false);
        assert_eq!(health.liveness_check().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_shared_store_check() {
        let backend = Arc::new(InMemorySharedBackend::new());
        let shared = SharedStore::new(
            backend.clone(),
            SharedStoreConfig::default(),
            Arc::new(CacheStatistics::new()),
        )
        .unwrap();

        assert_eq!(check_shared_store(&shared).await.status, HealthStatus::Healthy);

        backend.set_online(false);
        let result = check_shared_store(&shared).await;
        assert_eq!(result.status, HealthStatus::Degraded);
        assert!(result.message.unwrap().contains("unreachable"));
    }

    #[test]
    fn test_local_store_check() {
        let local = LocalStore::standalone(LocalStoreConfig {
            max_size_bytes: 100,
            max_entries: 100,
            shard_count: 2,
        })
        .unwrap();
        assert!(check_local_store(&local, 0.9).status.is_healthy());

        local.set("k", Bytes::from(vec![0u8; 95]), None, TagSet::new());
        assert_eq!(check_local_store(&local, 0.9).status, HealthStatus::Degraded);
    }

    #[test]
    fn test_alerts_check() {
        assert!(check_alerts(&[]).status.is_healthy());
    }
}
