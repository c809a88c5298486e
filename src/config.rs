//! Engine Configuration
//!
//! One YAML document with a section per component. Every section has
//! defaults, so an empty document is a valid configuration:
//!
//! ```yaml
//! redis_url: redis://cache.internal:6379
//! local:
//!   max_size_bytes: 268435456
//!   max_entries: 100000
//! shared:
//!   timeout_ms: 250
//!   compression:
//!     algorithm: gzip
//!     threshold_bytes: 1024
//! maintenance:
//!   high_watermark: 0.9
//!   low_watermark: 0.75
//! alerts:
//!   rules:
//!     - metric: p99_latency_ms
//!       direction: above
//!       threshold: 1500
//!       severity: critical
//!       title: Severe tail latency
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::alerting::AlertConfig;
use crate::cache::{LocalStoreConfig, MaintenanceConfig, OrchestratorConfig, SharedStoreConfig};
use crate::error::{Error, Result};
use crate::monitoring::SamplerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared tier backend; without it the engine runs local-only
    pub redis_url: Option<String>,
    pub local: LocalStoreConfig,
    pub shared: SharedStoreConfig,
    pub orchestrator: OrchestratorConfig,
    pub maintenance: MaintenanceConfig,
    pub sampler: SamplerConfig,
    pub alerts: AlertConfig,
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Internal(format!("cannot render configuration: {}", e)))
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.local.validate()?;
        self.shared.validate()?;
        self.orchestrator.validate()?;
        self.maintenance.validate()?;
        self.sampler.validate()?;
        self.alerts.validate()?;

        if let Some(url) = &self.redis_url {
            if url.trim().is_empty() {
                return Err(Error::Config("redis_url must not be empty".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::alerting::{AlertSeverity, MetricName};
    use crate::cache::CompressionAlgorithm;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_yaml_str("{}").unwrap();
        assert!(config.redis_url.is_none());
        assert_eq!(config.local.max_entries, crate::cache::DEFAULT_MAX_ENTRIES);
        assert_eq!(config.sampler.interval_secs, 30);
        assert_eq!(config.alerts.rules.len(), 6);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
redis_url: redis://localhost:6379
local:
  max_entries: 500
shared:
  compression:
    algorithm: lz4
alerts:
  rules:
    - metric: custom:failed_payments
      direction: above
      threshold: 10
      severity: critical
      title: Payment failures
"#;
        let config = EngineConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.local.max_entries, 500);
        assert_eq!(config.local.max_size_bytes, crate::cache::DEFAULT_MAX_SIZE_BYTES);
        assert_eq!(config.shared.compression.algorithm, CompressionAlgorithm::Lz4);
        assert_eq!(config.alerts.rules.len(), 1);
        assert_eq!(config.alerts.rules[0].metric, MetricName::Custom("failed_payments".into()));
        assert_eq!(config.alerts.rules[0].severity, AlertSeverity::Critical);
        assert_eq!(config.alerts.rules[0].hysteresis, 0.9);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert_matches!(
            EngineConfig::from_yaml_str("local:\n  max_entries: 0\n"),
            Err(Error::Config(msg)) if msg.contains("max_entries")
        );
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let yaml = "maintenance:\n  high_watermark: 0.5\n  low_watermark: 0.6\n";
        assert!(EngineConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let yaml = "alerts:\n  rules:\n    - metric: nonsense\n      direction: above\n      threshold: 1\n      severity: info\n      title: x\n";
        assert_matches!(EngineConfig::from_yaml_str(yaml), Err(Error::Config(_)));
    }

    #[test]
    fn test_yaml_roundtrip_is_valid() {
        let yaml = EngineConfig::default().to_yaml().unwrap();
        assert!(EngineConfig::from_yaml_str(&yaml).is_ok());
    }
}
