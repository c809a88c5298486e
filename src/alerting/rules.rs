//! Alert Rules
//!
//! A rule watches one metric of a [`PerformanceSnapshot`] against a
//! threshold. Breach and recovery use different bounds so a metric
//! hovering around the threshold does not flap:
//!
//! ```text
//!   Above:  breached  value >  threshold
//!           recovered value <= threshold * hysteresis          (e.g. 90%)
//!   Below:  breached  value <  threshold
//!           recovered value >= threshold * (2 - hysteresis)    (e.g. 110%)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::monitoring::PerformanceSnapshot;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Snapshot metric a rule can watch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricName {
    AvgLatencyMs,
    P95LatencyMs,
    P99LatencyMs,
    HitRate,
    CpuPercent,
    MemoryPercent,
    ErrorRate,
    InFlight,
    /// Business gauge from the metrics registry
    Custom(String),
}

impl MetricName {
    /// Read this metric from a snapshot
    pub fn value_in(&self, snapshot: &PerformanceSnapshot) -> Result<f64> {
        let unavailable = || Error::MetricUnavailable(self.to_string());
        let has_latency = snapshot.latency.count > 0;

        match self {
            MetricName::AvgLatencyMs => has_latency.then_some(snapshot.latency.avg_ms).ok_or_else(unavailable),
            MetricName::P95LatencyMs => has_latency.then_some(snapshot.latency.p95_ms).ok_or_else(unavailable),
            MetricName::P99LatencyMs => has_latency.then_some(snapshot.latency.p99_ms).ok_or_else(unavailable),
            MetricName::HitRate => snapshot.hit_rate.ok_or_else(unavailable),
            MetricName::CpuPercent => Ok(snapshot.cpu_percent),
            MetricName::MemoryPercent => Ok(snapshot.memory_percent),
            MetricName::ErrorRate => has_latency.then_some(snapshot.error_rate).ok_or_else(unavailable),
            MetricName::InFlight => Ok(snapshot.in_flight as f64),
            MetricName::Custom(name) => snapshot.custom.get(name).copied().ok_or_else(unavailable),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricName::AvgLatencyMs => write!(f, "avg_latency_ms"),
            MetricName::P95LatencyMs => write!(f, "p95_latency_ms"),
            MetricName::P99LatencyMs => write!(f, "p99_latency_ms"),
            MetricName::HitRate => write!(f, "hit_rate"),
            MetricName::CpuPercent => write!(f, "cpu_percent"),
            MetricName::MemoryPercent => write!(f, "memory_percent"),
            MetricName::ErrorRate => write!(f, "error_rate"),
            MetricName::InFlight => write!(f, "in_flight"),
            MetricName::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

impl FromStr for MetricName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "avg_latency_ms" => MetricName::AvgLatencyMs,
            "p95_latency_ms" => MetricName::P95LatencyMs,
            "p99_latency_ms" => MetricName::P99LatencyMs,
            "hit_rate" => MetricName::HitRate,
            "cpu_percent" => MetricName::CpuPercent,
            "memory_percent" => MetricName::MemoryPercent,
            "error_rate" => MetricName::ErrorRate,
            "in_flight" => MetricName::InFlight,
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.is_empty() => MetricName::Custom(name.to_string()),
                _ => return Err(Error::Config(format!("unknown metric '{}'", other))),
            },
        })
    }
}

impl TryFrom<String> for MetricName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MetricName> for String {
    fn from(metric: MetricName) -> Self {
        metric.to_string()
    }
}

/// Which side of the threshold is bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    Above,
    Below,
}

fn default_hysteresis() -> f64 {
    0.9
}

/// Threshold rule for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub metric: MetricName,
    pub threshold: f64,
    pub direction: ThresholdDirection,
    pub severity: AlertSeverity,
    pub title: String,
    /// Fraction of the threshold a metric must return within to recover
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,
}

impl AlertRule {
    pub fn new(
        metric: MetricName,
        direction: ThresholdDirection,
        threshold: f64,
        severity: AlertSeverity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            metric,
            threshold,
            direction,
            severity,
            title: title.into(),
            hysteresis: default_hysteresis(),
        }
    }

    pub fn with_hysteresis(mut self, hysteresis: f64) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    pub fn is_breached(&self, value: f64) -> bool {
        match self.direction {
            ThresholdDirection::Above => value > self.threshold,
            ThresholdDirection::Below => value < self.threshold,
        }
    }

    /// Whether `value` is back inside the hysteresis margin
    pub fn is_recovered(&self, value: f64) -> bool {
        match self.direction {
            ThresholdDirection::Above => value <= self.threshold * self.hysteresis,
            ThresholdDirection::Below => value >= self.threshold * (2.0 - self.hysteresis),
        }
    }

    pub fn describe(&self, value: f64) -> String {
        let relation = match self.direction {
            ThresholdDirection::Above => "above",
            ThresholdDirection::Below => "below",
        };
        format!(
            "{} is {:.2}, {} the threshold of {:.2}",
            self.metric, value, relation, self.threshold
        )
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(Error::Config(format!("rule {}: threshold must be finite", self.metric)));
        }
        if !(self.hysteresis > 0.0 && self.hysteresis <= 1.0) {
            return Err(Error::Config(format!(
                "rule {}: hysteresis must be in (0, 1], got {}",
                self.metric, self.hysteresis
            )));
        }
        Ok(())
    }

    /// Built-in rule set
    pub fn defaults() -> Vec<AlertRule> {
        use AlertSeverity::*;
        use ThresholdDirection::*;

        vec![
            AlertRule::new(MetricName::AvgLatencyMs, Above, 500.0, Warning, "High average latency"),
            AlertRule::new(MetricName::P99LatencyMs, Above, 2000.0, Critical, "Severe tail latency"),
            AlertRule::new(MetricName::HitRate, Below, 0.5, Warning, "Low cache hit rate"),
            AlertRule::new(MetricName::MemoryPercent, Above, 85.0, Critical, "High memory usage"),
            AlertRule::new(MetricName::CpuPercent, Above, 80.0, Warning, "High CPU usage"),
            AlertRule::new(MetricName::ErrorRate, Above, 0.05, Critical, "Elevated error rate"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name_roundtrip() {
        for name in ["avg_latency_ms", "hit_rate", "in_flight", "custom:revenue_per_minute"] {
            let metric: MetricName = name.parse().unwrap();
            assert_eq!(metric.to_string(), name);
        }
        assert!("bogus".parse::<MetricName>().is_err());
        assert!("custom:".parse::<MetricName>().is_err());
    }

    #[test]
    fn test_metric_name_serde() {
        let json = serde_json::to_string(&MetricName::Custom("orders".into())).unwrap();
        assert_eq!(json, "\"custom:orders\"");
        let parsed: MetricName = serde_json::from_str("\"p95_latency_ms\"").unwrap();
        assert_eq!(parsed, MetricName::P95LatencyMs);
    }

    #[test]
    fn test_upper_bound_hysteresis() {
        let rule = AlertRule::new(MetricName::CpuPercent, ThresholdDirection::Above, 80.0, AlertSeverity::Warning, "cpu");

        assert!(!rule.is_breached(80.0));
        assert!(rule.is_breached(80.1));
        assert!(!rule.is_recovered(75.0));
        assert!(rule.is_recovered(72.0));
    }

    #[test]
    fn test_lower_bound_hysteresis() {
        let rule = AlertRule::new(MetricName::HitRate, ThresholdDirection::Below, 0.5, AlertSeverity::Warning, "hit rate");

        assert!(rule.is_breached(0.4));
        assert!(!rule.is_breached(0.5));
        assert!(!rule.is_recovered(0.52));
        assert!(rule.is_recovered(0.56));
    }

    #[test]
    fn test_missing_metrics_are_unavailable() {
        let snapshot = PerformanceSnapshot::default();

        assert!(matches!(
            MetricName::HitRate.value_in(&snapshot),
            Err(Error::MetricUnavailable(_))
        ));
        assert!(MetricName::AvgLatencyMs.value_in(&snapshot).is_err());
        assert!(MetricName::Custom("orders".into()).value_in(&snapshot).is_err());
        assert_eq!(MetricName::CpuPercent.value_in(&snapshot).unwrap(), 0.0);
    }

    #[test]
    fn test_rule_validation() {
        let bad = AlertRule::new(MetricName::CpuPercent, ThresholdDirection::Above, 80.0, AlertSeverity::Info, "cpu")
            .with_hysteresis(1.5);
        assert!(bad.validate().is_err());

        for rule in AlertRule::defaults() {
            assert!(rule.validate().is_ok());
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }
}
