//! Performance Monitoring
//!
//! - [`sample`]: per-operation samples in a bounded rolling window
//! - [`sampler`]: periodic snapshots of latency, hit rate and host resources
//! - [`resources`]: host CPU/memory readers
//! - [`collector`]: business counters and gauges
//! - [`health`]: liveness, readiness and component checks
//! - [`exporter`]: Prometheus exposition

pub mod collector;
pub mod exporter;
pub mod health;
pub mod resources;
pub mod sample;
pub mod sampler;

pub use collector::{Counter, Gauge, MetricsCollector};
pub use exporter::{ExportState, PrometheusExporter};
pub use health::{HealthCheck, HealthCheckResult, HealthResponse, HealthStatus};
pub use resources::{resource_fn, ResourceFn, ResourceReader, ResourceUsage, SystemResourceReader};
pub use sample::{LatencySummary, MetricSample, OperationTimer, SampleWindow};
pub use sampler::{PerformanceSnapshot, Sampler, SamplerConfig};
