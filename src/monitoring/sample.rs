//! Operation Samples
//!
//! Every tracked operation leaves one [`MetricSample`] in a bounded rolling
//! [`SampleWindow`]. The window is bounded both by count and by age; the
//! sampler aggregates it into latency percentiles once per tick.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// One observed operation
#[derive(Debug, Clone, Serialize)]
pub struct MetricSample {
    pub operation: String,
    pub duration_ms: f64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip)]
    recorded_at: Instant,
}

impl MetricSample {
    pub fn new(operation: impl Into<String>, duration: Duration, error_kind: Option<&str>) -> Self {
        Self {
            operation: operation.into(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            success: error_kind.is_none(),
            timestamp: Utc::now(),
            error_kind: error_kind.map(str::to_string),
            recorded_at: Instant::now(),
        }
    }

    pub fn recorded_at(&self) -> Instant {
        self.recorded_at
    }
}

/// Bounded rolling window of samples
pub struct SampleWindow {
    samples: Mutex<VecDeque<MetricSample>>,
    retention: Duration,
    max_samples: usize,
    in_flight: AtomicU64,
    recorded: AtomicU64,
}

impl SampleWindow {
    pub fn new(retention: Duration, max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(max_samples.min(4096))),
            retention,
            max_samples: max_samples.max(1),
            in_flight: AtomicU64::new(0),
            recorded: AtomicU64::new(0),
        }
    }

    /// Append a sample, dropping the oldest beyond the count or age bound
    pub fn record(&self, sample: MetricSample) {
        let now = sample.recorded_at;
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
        while samples
            .front()
            .is_some_and(|s| now.saturating_duration_since(s.recorded_at) > self.retention)
        {
            samples.pop_front();
        }
        drop(samples);
        self.recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_operation(&self, operation: &str, duration: Duration, error_kind: Option<&str>) {
        self.record(MetricSample::new(operation, duration, error_kind));
    }

    /// Start timing an operation; counts as in flight until finished
    pub fn start(&self, operation: &str) -> OperationTimer<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        OperationTimer {
            window: self,
            operation: operation.to_string(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Samples recorded within `window` of now, oldest first
    pub fn recent(&self, window: Duration) -> Vec<MetricSample> {
        let now = Instant::now();
        self.samples
            .lock()
            .iter()
            .filter(|s| now.saturating_duration_since(s.recorded_at) <= window)
            .cloned()
            .collect()
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Samples currently retained
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples ever recorded
    pub fn total_recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }
}

/// In-flight operation guard.
///
/// Dropping it without [`finish`](Self::finish) records a `cancelled`
/// failure, which is what happens when a tracked future is dropped.
pub struct OperationTimer<'a> {
    window: &'a SampleWindow,
    operation: String,
    started: Instant,
    finished: bool,
}

impl OperationTimer<'_> {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record the sample; `error_kind` of `None` means success
    pub fn finish(mut self, error_kind: Option<&str>) {
        self.complete(error_kind);
    }

    fn complete(&mut self, error_kind: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.window.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.window
            .record_operation(&self.operation, self.started.elapsed(), error_kind);
    }
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        self.complete(Some("cancelled"));
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// Latency summary over a set of samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub errors: usize,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a MetricSample>) -> Self {
        let mut durations = Vec::new();
        let mut errors = 0;
        for sample in samples {
            durations.push(sample.duration_ms);
            if !sample.success {
                errors += 1;
            }
        }
        if durations.is_empty() {
            return Self::default();
        }
        durations.sort_by(f64::total_cmp);

        let count = durations.len();
        Self {
            count,
            errors,
            avg_ms: durations.iter().sum::<f64>() / count as f64,
            p95_ms: percentile(&durations, 0.95),
            p99_ms: percentile(&durations, 0.99),
            max_ms: durations[count - 1],
        }
    }

    /// Fraction of failed samples
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }
}

/// Nearest-rank percentile of sorted, non-empty data
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Summaries per operation name
pub fn summarize_by_operation(samples: &[MetricSample]) -> BTreeMap<String, LatencySummary> {
    let mut grouped: BTreeMap<&str, Vec<&MetricSample>> = BTreeMap::new();
    for sample in samples {
        grouped.entry(sample.operation.as_str()).or_default().push(sample);
    }
    grouped
        .into_iter()
        .map(|(op, samples)| (op.to_string(), LatencySummary::from_samples(samples)))
        .collect()
}
