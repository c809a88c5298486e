//! Alert Engine
//!
//! Evaluates every rule against each [`PerformanceSnapshot`]. Per metric the
//! lifecycle is:
//!
//! ```text
//!   Normal ──breach──► Active ──recover / resolve()──► Resolved
//!                        │                                 ▲
//!                   acknowledge()                          │
//!                        ▼                                 │
//!                   Acknowledged ──recover / resolve()─────┘
//! ```
//!
//! At most one unresolved alert exists per metric. Resolved alerts are
//! kept for audit and never deleted.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::rules::{AlertRule, AlertSeverity, MetricName};
use super::sinks::{dispatch, AlertNotification, AlertSink};
use crate::error::{Error, Result};
use crate::monitoring::PerformanceSnapshot;

/// Actor recorded when an alert resolves on its own
pub const AUTO_RESOLVER: &str = "auto";

// =============================================================================
// Alert
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgment {
    pub actor: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub metric_name: MetricName,
    pub current_value: f64,
    pub threshold_value: f64,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub acknowledgments: Vec<Acknowledgment>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl Alert {
    fn open(rule: &AlertRule, value: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity: rule.severity,
            title: rule.title.clone(),
            description: rule.describe(value),
            metric_name: rule.metric.clone(),
            current_value: value,
            threshold_value: rule.threshold,
            created_at: Utc::now(),
            status: AlertStatus::Active,
            acknowledgments: Vec::new(),
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    fn close(&mut self, actor: &str) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(actor.to_string());
    }
}

// =============================================================================
// Configuration
// =============================================================================

fn default_notify_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "AlertRule::defaults")]
    pub rules: Vec<AlertRule>,
    /// Per-sink delivery timeout
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            rules: AlertRule::defaults(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl AlertConfig {
    pub fn validate(&self) -> Result<()> {
        if self.notify_timeout_ms == 0 {
            return Err(Error::Config("alerts.notify_timeout_ms must be greater than 0".into()));
        }
        let mut seen = HashSet::new();
        for rule in &self.rules {
            rule.validate()?;
            if !seen.insert(&rule.metric) {
                return Err(Error::Config(format!("duplicate alert rule for metric {}", rule.metric)));
            }
        }
        Ok(())
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub created: Vec<Alert>,
    pub resolved: Vec<Alert>,
    /// Rules whose metric could not be read from the snapshot
    pub skipped: usize,
}

pub struct AlertEngine {
    config: AlertConfig,
    alerts: RwLock<Vec<Alert>>,
    sinks: Arc<Vec<Arc<dyn AlertSink>>>,
    notifications_failed: Arc<AtomicU64>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig, sinks: Vec<Arc<dyn AlertSink>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            alerts: RwLock::new(Vec::new()),
            sinks: Arc::new(sinks),
            notifications_failed: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.config.rules
    }

    /// Evaluate every rule against one snapshot.
    pub fn evaluate(&self, snapshot: &PerformanceSnapshot) -> Evaluation {
        let mut outcome = Evaluation::default();

        {
            let mut alerts = self.alerts.write();
            for rule in &self.config.rules {
                let value = match rule.metric.value_in(snapshot) {
                    Ok(v) if v.is_finite() => v,
                    Ok(v) => {
                        warn!(metric = %rule.metric, value = v, "Skipping rule: non-finite metric");
                        outcome.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        debug!(metric = %rule.metric, error = %e, "Skipping rule");
                        outcome.skipped += 1;
                        continue;
                    }
                };

                let open = alerts
                    .iter_mut()
                    .find(|a| a.metric_name == rule.metric && !a.is_resolved());

                match open {
                    Some(alert) => {
                        alert.current_value = value;
                        if rule.is_recovered(value) {
                            alert.close(AUTO_RESOLVER);
                            info!(alert_id = %alert.id, metric = %rule.metric, value, "Alert auto-resolved");
                            outcome.resolved.push(alert.clone());
                        }
                    }
                    None if rule.is_breached(value) => {
                        let alert = Alert::open(rule, value);
                        info!(
                            alert_id = %alert.id,
                            severity = %alert.severity,
                            metric = %rule.metric,
                            value,
                            threshold = rule.threshold,
                            "Alert raised"
                        );
                        alerts.push(alert.clone());
                        outcome.created.push(alert);
                    }
                    None => {}
                }
            }
        }

        for alert in &outcome.created {
            self.notify(alert);
        }
        outcome
    }

    /// Fire-and-forget delivery to every sink
    fn notify(&self, alert: &Alert) {
        if self.sinks.is_empty() {
            return;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(alert_id = %alert.id, "No runtime available, alert notification dropped");
                return;
            }
        };

        let sinks = Arc::clone(&self.sinks);
        let failed_counter = Arc::clone(&self.notifications_failed);
        let notification = AlertNotification::from(alert);
        let timeout = self.config.notify_timeout();
        handle.spawn(async move {
            let failed = dispatch(&sinks, &notification, timeout).await;
            failed_counter.fetch_add(failed as u64, Ordering::Relaxed);
        });
    }

    /// Record an acknowledgment without resolving
    pub fn acknowledge(&self, id: Uuid, actor: &str) -> Result<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(Error::AlertNotFound(id))?;

        if alert.is_resolved() {
            return Err(Error::InvalidAlertTransition {
                id,
                action: "acknowledged".into(),
            });
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledgments.push(Acknowledgment {
            actor: actor.to_string(),
            at: Utc::now(),
        });
        info!(alert_id = %id, actor, "Alert acknowledged");
        Ok(alert.clone())
    }

    /// Force-resolve an alert
    pub fn resolve(&self, id: Uuid, actor: &str) -> Result<Alert> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(Error::AlertNotFound(id))?;

        if alert.is_resolved() {
            return Err(Error::InvalidAlertTransition {
                id,
                action: "resolved".into(),
            });
        }
        alert.close(actor);
        info!(alert_id = %id, actor, "Alert resolved");
        Ok(alert.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<Alert> {
        self.alerts.read().iter().find(|a| a.id == id).cloned()
    }

    /// Unresolved alerts, most severe first
    pub fn active(&self) -> Vec<Alert> {
        let mut active: Vec<Alert> = self
            .alerts
            .read()
            .iter()
            .filter(|a| !a.is_resolved())
            .cloned()
            .collect();
        active.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.created_at.cmp(&b.created_at)));
        active
    }

    /// Every alert ever raised, in creation order
    pub fn all(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    pub fn notifications_failed(&self) -> u64 {
        self.notifications_failed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::alerting::rules::ThresholdDirection;
    use crate::alerting::sinks::InMemoryAlertSink;

    fn cpu_rule() -> AlertRule {
        AlertRule::new(
            MetricName::CpuPercent,
            ThresholdDirection::Above,
            80.0,
            AlertSeverity::Warning,
            "High CPU usage",
        )
    }

    fn engine(rules: Vec<AlertRule>) -> AlertEngine {
        AlertEngine::new(
            AlertConfig {
                rules,
                ..Default::default()
            },
            Vec::new(),
        )
        .unwrap()
    }

    fn cpu(value: f64) -> PerformanceSnapshot {
        PerformanceSnapshot {
            cpu_percent: value,
            ..Default::default()
        }
    }

    #[test]
    fn test_duplicate_metric_rejected() {
        let config = AlertConfig {
            rules: vec![cpu_rule(), cpu_rule()],
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
        assert!(AlertConfig::default().validate().is_ok());
    }

    #[test]
    fn test_one_alert_across_repeated_breaches() {
        let engine = engine(vec![cpu_rule()]);

        let first = engine.evaluate(&cpu(95.0));
        assert_eq!(first.created.len(), 1);

        for _ in 0..5 {
            let next = engine.evaluate(&cpu(97.0));
            assert!(next.created.is_empty());
        }

        assert_eq!(engine.active().len(), 1);
        assert_eq!(engine.active()[0].current_value, 97.0);
    }

    #[test]
    fn test_hysteresis_before_auto_resolution() {
        let engine = engine(vec![cpu_rule()]);
        engine.evaluate(&cpu(95.0));

        // Below threshold but inside the margin
        assert!(engine.evaluate(&cpu(75.0)).resolved.is_empty());
        assert_eq!(engine.active().len(), 1);

        let outcome = engine.evaluate(&cpu(70.0));
        assert_eq!(outcome.resolved.len(), 1);
        assert_eq!(outcome.resolved[0].resolved_by.as_deref(), Some(AUTO_RESOLVER));
        assert!(engine.active().is_empty());
        assert_eq!(engine.all().len(), 1);
    }

    #[test]
    fn test_rebreach_after_resolution_opens_new_alert() {
        let engine = engine(vec![cpu_rule()]);
        engine.evaluate(&cpu(95.0));
        engine.evaluate(&cpu(10.0));
        engine.evaluate(&cpu(95.0));

        let all = engine.all();
        assert_eq!(all.len(), 2);
        assert!(all[0].is_resolved());
        assert!(!all[1].is_resolved());
    }

    #[test]
    fn test_acknowledge_then_resolve() {
        let engine = engine(vec![cpu_rule()]);
        let id = engine.evaluate(&cpu(95.0)).created[0].id;

        let acked = engine.acknowledge(id, "oncall").unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledgments.len(), 1);
        assert!(!acked.is_resolved());

        // Still counts as unresolved for the metric
        assert!(engine.evaluate(&cpu(96.0)).created.is_empty());

        let resolved = engine.resolve(id, "oncall").unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(resolved.resolved_by.as_deref(), Some("oncall"));

        assert_matches!(engine.acknowledge(id, "oncall"), Err(Error::InvalidAlertTransition { .. }));
        assert_matches!(engine.resolve(id, "oncall"), Err(Error::InvalidAlertTransition { .. }));
    }

    #[test]
    fn test_unknown_alert() {
        let engine = engine(vec![cpu_rule()]);
        let id = Uuid::new_v4();
        assert_matches!(engine.acknowledge(id, "x"), Err(Error::AlertNotFound(missing)) if missing == id);
        assert!(engine.get(id).is_none());
    }

    #[test]
    fn test_unavailable_metrics_are_isolated() {
        let engine = engine(AlertRule::defaults());
        // No latency samples and no hit rate
        let outcome = engine.evaluate(&cpu(95.0));

        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].metric_name, MetricName::CpuPercent);
        assert_eq!(outcome.skipped, 4);
    }

    #[test]
    fn test_custom_gauge_rule() {
        let rule = AlertRule::new(
            MetricName::Custom("failed_payments".into()),
            ThresholdDirection::Above,
            10.0,
            AlertSeverity::Critical,
            "Payment failures",
        );
        let engine = engine(vec![rule]);

        let mut snapshot = PerformanceSnapshot::default();
        assert_eq!(engine.evaluate(&snapshot).skipped, 1);

        snapshot.custom.insert("failed_payments".into(), 25.0);
        let outcome = engine.evaluate(&snapshot);
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_active_sorted_by_severity() {
        let memory = AlertRule::new(
            MetricName::MemoryPercent,
            ThresholdDirection::Above,
            85.0,
            AlertSeverity::Critical,
            "High memory usage",
        );
        let engine = engine(vec![cpu_rule(), memory]);

        engine.evaluate(&PerformanceSnapshot {
            cpu_percent: 99.0,
            memory_percent: 99.0,
            ..Default::default()
        });

        let active = engine.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn test_sinks_notified_on_creation_only() {
        let sink = Arc::new(InMemoryAlertSink::new());
        let engine = AlertEngine::new(
            AlertConfig {
                rules: vec![cpu_rule()],
                ..Default::default()
            },
            vec![sink.clone() as Arc<dyn AlertSink>],
        )
        .unwrap();

        engine.evaluate(&cpu(95.0));
        engine.evaluate(&cpu(96.0));
        engine.evaluate(&cpu(10.0));

        for _ in 0..50 {
            if !sink.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.notifications()[0].metric_name, "cpu_percent");
        assert_eq!(engine.notifications_failed(), 0);
    }

    #[test]
    fn test_evaluate_without_runtime_does_not_panic() {
        let engine = AlertEngine::new(
            AlertConfig {
                rules: vec![cpu_rule()],
                ..Default::default()
            },
            vec![Arc::new(InMemoryAlertSink::new()) as Arc<dyn AlertSink>],
        )
        .unwrap();

        assert_eq!(engine.evaluate(&cpu(95.0)).created.len(), 1);
    }
}
