//! Host Resource Readers
//!
//! The sampler reads CPU and memory utilization through [`ResourceReader`].
//! [`SystemResourceReader`] uses `sysinfo`; [`resource_fn`] adapts any
//! closure, which is what tests and embedders with their own probes use.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::error::{Error, Result};

/// Host utilization in percent (0-100)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Source of host resource readings
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read(&self) -> Result<ResourceUsage>;
}

/// Reader backed by `sysinfo`.
///
/// CPU usage is a delta between refreshes, so the first reading after
/// construction reports 0%.
pub struct SystemResourceReader {
    system: Arc<Mutex<System>>,
}

impl SystemResourceReader {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }
}

impl Default for SystemResourceReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceReader for SystemResourceReader {
    async fn read(&self) -> Result<ResourceUsage> {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut system = system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();

            let total = system.total_memory();
            if total == 0 {
                return Err(Error::ResourceRead("total memory reported as zero".into()));
            }
            Ok(ResourceUsage {
                cpu_percent: f64::from(system.global_cpu_usage()),
                memory_percent: system.used_memory() as f64 / total as f64 * 100.0,
            })
        })
        .await
        .map_err(|e| Error::ResourceRead(format!("resource probe panicked: {}", e)))?
    }
}

/// Closure-backed reader
pub struct ResourceFn<F>(F);

/// Wrap a closure as a [`ResourceReader`]
pub fn resource_fn<F>(f: F) -> ResourceFn<F>
where
    F: Fn() -> Result<ResourceUsage> + Send + Sync,
{
    ResourceFn(f)
}

#[async_trait]
impl<F> ResourceReader for ResourceFn<F>
where
    F: Fn() -> Result<ResourceUsage> + Send + Sync,
{
    async fn read(&self) -> Result<ResourceUsage> {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_reader() {
        let reader = resource_fn(|| {
            Ok(ResourceUsage {
                cpu_percent: 12.5,
                memory_percent: 40.0,
            })
        });
        let usage = reader.read().await.unwrap();
        assert_eq!(usage.cpu_percent, 12.5);
        assert_eq!(usage.memory_percent, 40.0);
    }

    #[tokio::test]
    async fn test_closure_reader_error() {
        let reader = resource_fn(|| Err(Error::ResourceRead("sensor offline".into())));
        assert!(matches!(reader.read().await, Err(Error::ResourceRead(_))));
    }

    #[tokio::test]
    async fn test_system_reader_in_range() {
        let reader = SystemResourceReader::new();
        let usage = reader.read().await.unwrap();

        assert!((0.0..=100.0).contains(&usage.memory_percent));
        assert!(usage.cpu_percent >= 0.0);
    }
}
