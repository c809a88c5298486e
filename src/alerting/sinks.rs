//! Alert Notification Sinks
//!
//! Sinks receive a flat [`AlertNotification`] whenever an alert is created.
//! Delivery is fire-and-forget: [`dispatch`] invokes every sink
//! independently under a timeout and only logs failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::Alert;
use super::rules::AlertSeverity;
use crate::error::{Error, Result};

/// Payload handed to every sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertNotification {
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub metric_name: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&Alert> for AlertNotification {
    fn from(alert: &Alert) -> Self {
        Self {
            severity: alert.severity,
            title: alert.title.clone(),
            description: alert.description.clone(),
            metric_name: alert.metric_name.to_string(),
            current_value: alert.current_value,
            threshold_value: alert.threshold_value,
            timestamp: alert.created_at,
        }
    }
}

/// Alert notification transport
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, notification: &AlertNotification) -> Result<()>;
}

// =============================================================================
// Logging Sink
// =============================================================================

/// Writes notifications to the tracing system.
#[derive(Debug, Clone, Default)]
pub struct LoggingAlertSink {
    /// Log non-critical alerts at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info_level() -> Self {
        Self { info_level: true }
    }

    pub fn debug_level() -> Self {
        Self { info_level: false }
    }
}

#[async_trait]
impl AlertSink for LoggingAlertSink {
    fn name(&self) -> &str {
        "logging"
    }

    async fn notify(&self, n: &AlertNotification) -> Result<()> {
        if n.severity == AlertSeverity::Critical {
            warn!(
                severity = %n.severity,
                metric = %n.metric_name,
                current = n.current_value,
                threshold = n.threshold_value,
                "{}",
                n.title
            );
        } else if self.info_level {
            info!(
                severity = %n.severity,
                metric = %n.metric_name,
                current = n.current_value,
                threshold = n.threshold_value,
                "{}",
                n.title
            );
        } else {
            debug!(
                severity = %n.severity,
                metric = %n.metric_name,
                current = n.current_value,
                threshold = n.threshold_value,
                "{}",
                n.title
            );
        }
        Ok(())
    }
}

// =============================================================================
// In-Memory Sink
// =============================================================================

/// Collects notifications in memory for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    notifications: parking_lot::RwLock<Vec<AlertNotification>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<AlertNotification> {
        self.notifications.read().clone()
    }

    pub fn len(&self) -> usize {
        self.notifications.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.read().is_empty()
    }

    pub fn clear(&self) {
        self.notifications.write().clear();
    }

    pub fn for_metric(&self, metric_name: &str) -> Vec<AlertNotification> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.metric_name == metric_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn notify(&self, notification: &AlertNotification) -> Result<()> {
        self.notifications.write().push(notification.clone());
        Ok(())
    }
}

// =============================================================================
// Webhook Sink
// =============================================================================

/// POSTs each notification as JSON.
pub struct WebhookAlertSink {
    url: String,
    client: Client,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, notification: &AlertNotification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::Notification {
                sink: self.name().to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::Notification {
                sink: self.name().to_string(),
                reason: format!("endpoint returned {}", response.status()),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Deliver to every sink concurrently. Returns the number of sinks that
/// failed or timed out.
pub async fn dispatch(
    sinks: &[Arc<dyn AlertSink>],
    notification: &AlertNotification,
    timeout: Duration,
) -> usize {
    let deliveries = sinks.iter().map(|sink| async move {
        match tokio::time::timeout(timeout, sink.notify(notification)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(sink = sink.name(), title = %notification.title, error = %e, "Alert notification failed");
                false
            }
            Err(_) => {
                warn!(
                    sink = sink.name(),
                    title = %notification.title,
                    timeout_ms = timeout.as_millis() as u64,
                    "Alert notification timed out"
                );
                false
            }
        }
    });

    join_all(deliveries).await.into_iter().filter(|ok| !ok).count()
}
