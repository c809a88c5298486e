//! Alerting
//!
//! Threshold rules over performance snapshots, alert lifecycle with
//! hysteresis, notification sinks and advisory recommendations.

mod engine;
mod recommend;
mod rules;
pub mod sinks;

pub use engine::{Acknowledgment, Alert, AlertConfig, AlertEngine, AlertStatus, Evaluation, AUTO_RESOLVER};
pub use recommend::{recommend, RecommendationThresholds};
pub use rules::{AlertRule, AlertSeverity, MetricName, ThresholdDirection};
pub use sinks::{dispatch, AlertNotification, AlertSink, InMemoryAlertSink, LoggingAlertSink, WebhookAlertSink};
