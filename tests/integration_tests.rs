//! tierwatch Integration Tests
//!
//! End-to-end behaviour through the public engine API:
//! - Feature 1: Two-tier caching (eviction, TTL, tags, memoization)
//! - Feature 2: Observability (sampling, alerting, reporting)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tierwatch::alerting::{
    AlertConfig, AlertRule, AlertSeverity, AlertStatus, InMemoryAlertSink, MetricName, ThresholdDirection,
};
use tierwatch::cache::{tags, CacheTier, InMemorySharedBackend, TagSet};
use tierwatch::monitoring::{resource_fn, ResourceUsage};
use tierwatch::{CacheEngine, EngineConfig};

fn engine(config: EngineConfig) -> (CacheEngine, Arc<InMemorySharedBackend>) {
    let backend = Arc::new(InMemorySharedBackend::new());
    let engine = CacheEngine::builder(config)
        .shared_backend(backend.clone())
        .resource_reader(Arc::new(resource_fn(|| {
            Ok(ResourceUsage {
                cpu_percent: 20.0,
                memory_percent: 40.0,
            })
        })))
        .build()
        .unwrap();
    (engine, backend)
}

// =============================================================================
// Feature 1: Two-Tier Caching
// =============================================================================

mod cache_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_lru_scenario_keeps_recently_read_entry() {
        let mut config = EngineConfig::default();
        config.local.max_entries = 2;
        let (engine, _) = engine(config);
        let cache = engine.cache();

        cache.set("a", &1, None, &TagSet::new(), CacheTier::Local).await;
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("b", &2, None, &TagSet::new(), CacheTier::Local).await;
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get::<i32>("a", CacheTier::Local).await, Some(1));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.set("c", &3, None, &TagSet::new(), CacheTier::Local).await;

        assert_eq!(cache.local().keys(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(cache.statistics().snapshot().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_scenario() {
        let (engine, _) = engine(EngineConfig::default());
        let cache = engine.cache();

        cache
            .set("k", "v", Some(Duration::from_secs(1)), &TagSet::new(), CacheTier::Local)
            .await;
        assert_eq!(cache.get::<String>("k", CacheTier::Local).await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get::<String>("k", CacheTier::Local).await, None);
        assert!(!cache.local().contains("k"));
    }

    #[tokio::test]
    async fn test_write_through_and_tag_invalidation_across_tiers() {
        let (engine, backend) = engine(EngineConfig::default());
        let cache = engine.cache();

        cache
            .set("user:1", &"alice", None, &tags(["users"]), CacheTier::LocalPreferred)
            .await;
        cache
            .set("user:2", &"bob", None, &tags(["users"]), CacheTier::LocalPreferred)
            .await;
        cache
            .set("order:9", &99, None, &tags(["orders"]), CacheTier::LocalPreferred)
            .await;
        assert!(backend.contains("user:1"));

        cache.invalidate_by_tags(&tags(["users"]), CacheTier::LocalPreferred).await;

        assert_eq!(cache.get::<String>("user:1", CacheTier::LocalPreferred).await, None);
        assert_eq!(cache.get::<String>("user:2", CacheTier::Shared).await, None);
        assert!(!backend.contains("user:1"));
        assert_eq!(cache.get::<i32>("order:9", CacheTier::LocalPreferred).await, Some(99));
    }

    #[tokio::test]
    async fn test_shared_outage_fails_open() {
        let (engine, backend) = engine(EngineConfig::default());
        let cache = engine.cache();
        backend.set_online(false);

        // Local tier still accepts the write
        assert!(cache.set("k", &7, None, &TagSet::new(), CacheTier::LocalPreferred).await);
        assert_eq!(cache.get::<i32>("k", CacheTier::LocalPreferred).await, Some(7));
        assert_eq!(cache.get::<i32>("other", CacheTier::Shared).await, None);
        assert!(!cache.set("s", &1, None, &TagSet::new(), CacheTier::Shared).await);

        assert!(cache.statistics().snapshot().shared_errors > 0);
    }

    #[tokio::test]
    async fn test_memoization_runs_computation_once() {
        let (engine, _) = engine(EngineConfig::default());
        let calls = AtomicUsize::new(0);
        let memo = engine.cache().memoize("reports.monthly").tags(tags(["reports"]));

        for _ in 0..3 {
            let counter = &calls;
            let total: u64 = memo
                .call(&("2024-05", 42), move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    1234
                })
                .await;
            assert_eq!(total, 1234);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        engine
            .cache()
            .invalidate_by_tags(&tags(["reports"]), CacheTier::LocalPreferred)
            .await;
        let counter = &calls;
        let _: u64 = memo
            .call(&("2024-05", 42), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                1234
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_statistics_count_every_get_under_concurrency() {
        let (engine, _) = engine(EngineConfig::default());
        let engine = Arc::new(engine);

        for i in 0..10 {
            engine
                .cache()
                .set(&format!("k{}", i), &i, None, &TagSet::new(), CacheTier::LocalPreferred)
                .await;
        }

        let tasks: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move {
                    for i in 0..100 {
                        let key = format!("k{}", (i + t) % 20);
                        engine.cache().get::<i32>(&key, CacheTier::LocalPreferred).await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let stats = engine.cache().statistics().snapshot();
        assert_eq!(stats.hits + stats.misses, 800);
        assert_eq!(stats.hits, 400);
    }
}

// =============================================================================
// Feature 2: Observability
// =============================================================================

mod observability_tests {
    use super::*;

    fn latency_rule() -> AlertRule {
        AlertRule::new(
            MetricName::AvgLatencyMs,
            ThresholdDirection::Above,
            100.0,
            AlertSeverity::Warning,
            "Slow operations",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_lifecycle_with_hysteresis() {
        let mut config = EngineConfig::default();
        config.sampler.window_secs = 30;
        config.alerts = AlertConfig {
            rules: vec![latency_rule()],
            ..Default::default()
        };
        let sink = Arc::new(InMemoryAlertSink::new());
        let engine = CacheEngine::builder(config)
            .resource_reader(Arc::new(resource_fn(|| Ok(ResourceUsage::default()))))
            .alert_sink(sink.clone())
            .build()
            .unwrap();
        let cache = engine.cache();

        // Breach for several snapshots
        for _ in 0..3 {
            let _ = cache
                .track("reports.generate", async {
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    Ok::<_, std::convert::Infallible>(())
                })
                .await;
            engine.tick().await.unwrap();
        }
        let active = engine.alerts().active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].metric_name, MetricName::AvgLatencyMs);

        let acked = engine.alerts().acknowledge(active[0].id, "oncall").unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);

        // Slow samples age out of the window, fast ones remain
        tokio::time::advance(Duration::from_secs(60)).await;
        let _ = cache
            .track("reports.generate", async { Ok::<_, std::convert::Infallible>(()) })
            .await;
        engine.tick().await.unwrap();

        assert!(engine.alerts().active().is_empty());
        let all = engine.alerts().all();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_resolved());

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_report_includes_snapshot_and_recommendations() {
        let (engine, _) = engine(EngineConfig::default());
        let cache = engine.cache();

        for i in 0..5 {
            cache.get::<i32>(&format!("missing{}", i), CacheTier::LocalPreferred).await;
        }
        engine.metrics().gauge("orders_per_minute").set(17.0);
        engine.tick().await.unwrap();

        let report = engine.report();
        let snapshot = report.snapshot.as_ref().unwrap();
        assert_eq!(snapshot.hit_rate, Some(0.0));
        assert_eq!(snapshot.custom["orders_per_minute"], 17.0);
        assert!(snapshot.operations.contains_key("cache.get"));
        assert!(report.recommendations.iter().any(|r| r.contains("hit rate")));

        // Default rules include a low hit rate warning
        assert!(report
            .active_alerts
            .iter()
            .any(|a| a.metric_name == MetricName::HitRate));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"hit_rate\""));
    }

    #[tokio::test]
    async fn test_engine_lifecycle_and_metrics() {
        let (engine, _) = engine(EngineConfig::default());
        engine.initialize().await.unwrap();

        engine
            .cache()
            .set("k", &1, None, &TagSet::new(), CacheTier::LocalPreferred)
            .await;
        engine.cache().get::<i32>("k", CacheTier::LocalPreferred).await;

        let (_, body) = engine.metrics_text().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("tierwatch_cache_sets_total 1"));

        let health = engine.health().await;
        assert!(health.status.is_operational());

        engine.shutdown().await;
        assert!(!engine.is_running());
    }
}
