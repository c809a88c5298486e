//! Tuning Recommendations
//!
//! Advisory text derived from a snapshot. Nothing here acts on the engine;
//! the strings end up in the report for an operator to read.

use crate::monitoring::PerformanceSnapshot;

/// Tunable limits the advice is measured against
#[derive(Debug, Clone)]
pub struct RecommendationThresholds {
    pub min_hit_rate: f64,
    pub max_avg_latency_ms: f64,
    pub max_memory_percent: f64,
    pub max_cpu_percent: f64,
    pub max_error_rate: f64,
    /// Local store utilization that counts as "near capacity"
    pub max_utilization: f64,
    /// Evictions per set above which the local store is thrashing
    pub max_eviction_ratio: f64,
}

impl Default for RecommendationThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.8,
            max_avg_latency_ms: 200.0,
            max_memory_percent: 80.0,
            max_cpu_percent: 70.0,
            max_error_rate: 0.01,
            max_utilization: 0.9,
            max_eviction_ratio: 0.2,
        }
    }
}

/// Recommendations for one snapshot, most actionable first
pub fn recommend(
    snapshot: &PerformanceSnapshot,
    local_capacity_bytes: u64,
    thresholds: &RecommendationThresholds,
) -> Vec<String> {
    let mut advice = Vec::new();
    let cache = &snapshot.cache;

    if snapshot.latency.count > 0 && snapshot.error_rate > thresholds.max_error_rate {
        advice.push(format!(
            "Error rate is {:.1}%; check shared store connectivity and upstream dependencies",
            snapshot.error_rate * 100.0
        ));
    }

    if let Some(hit_rate) = snapshot.hit_rate {
        if hit_rate < thresholds.min_hit_rate {
            advice.push(format!(
                "Cache hit rate is {:.1}%; consider longer TTLs or caching more expensive operations",
                hit_rate * 100.0
            ));
        }
    }

    if cache.sets > 0 && cache.evictions as f64 / cache.sets as f64 > thresholds.max_eviction_ratio {
        advice.push(format!(
            "{} evictions for {} writes; increase the local store size or shorten TTLs",
            cache.evictions, cache.sets
        ));
    } else if local_capacity_bytes > 0
        && cache.size_bytes as f64 / local_capacity_bytes as f64 > thresholds.max_utilization
    {
        advice.push("Local store is near capacity; increase max_size_bytes".to_string());
    }

    if snapshot.latency.count > 0 && snapshot.latency.avg_ms > thresholds.max_avg_latency_ms {
        match snapshot.slowest_operations.first() {
            Some(op) => advice.push(format!(
                "Average latency is {:.0}ms; '{}' is the slowest operation and a candidate for memoization",
                snapshot.latency.avg_ms, op
            )),
            None => advice.push(format!("Average latency is {:.0}ms", snapshot.latency.avg_ms)),
        }
    }

    if cache.shared_errors > 0 {
        advice.push(format!(
            "{} shared store errors; verify the distributed cache is reachable",
            cache.shared_errors
        ));
    }

    if snapshot.memory_percent > thresholds.max_memory_percent {
        advice.push(format!(
            "Memory usage is {:.0}%; reduce the local store size or scale out",
            snapshot.memory_percent
        ));
    }

    if snapshot.cpu_percent > thresholds.max_cpu_percent {
        advice.push(format!(
            "CPU usage is {:.0}%; raise the compression threshold or scale out",
            snapshot.cpu_percent
        ));
    }

    advice
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::LatencySummary;

    #[test]
    fn test_healthy_snapshot_has_no_advice() {
        let snapshot = PerformanceSnapshot {
            hit_rate: Some(0.95),
            cpu_percent: 20.0,
            memory_percent: 40.0,
            ..Default::default()
        };
        assert!(recommend(&snapshot, 1 << 20, &RecommendationThresholds::default()).is_empty());
    }

    #[test]
    fn test_low_hit_rate() {
        let snapshot = PerformanceSnapshot {
            hit_rate: Some(0.3),
            ..Default::default()
        };
        let advice = recommend(&snapshot, 1 << 20, &RecommendationThresholds::default());
        assert_eq!(advice.len(), 1);
        assert!(advice[0].contains("30.0%"));
    }

    #[test]
    fn test_slow_operation_named() {
        let snapshot = PerformanceSnapshot {
            latency: LatencySummary {
                count: 10,
                avg_ms: 450.0,
                ..Default::default()
            },
            slowest_operations: vec!["reports.generate".into()],
            ..Default::default()
        };
        let advice = recommend(&snapshot, 1 << 20, &RecommendationThresholds::default());
        assert!(advice.iter().any(|a| a.contains("reports.generate")));
    }

    #[test]
    fn test_eviction_pressure() {
        let mut snapshot = PerformanceSnapshot::default();
        snapshot.cache.sets = 100;
        snapshot.cache.evictions = 60;

        let advice = recommend(&snapshot, 1 << 20, &RecommendationThresholds::default());
        assert!(advice[0].contains("60 evictions"));
    }

    #[test]
    fn test_resource_pressure() {
        let snapshot = PerformanceSnapshot {
            cpu_percent: 95.0,
            memory_percent: 92.0,
            ..Default::default()
        };
        let advice = recommend(&snapshot, 1 << 20, &RecommendationThresholds::default());
        assert_eq!(advice.len(), 2);
    }
}
