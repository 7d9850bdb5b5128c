//! Observability: per-request ids, histogram metrics, timing spans.
//! Histograms keep the most recent samples per metric and report p50/p95/p99.
//! Plain event counts live in a separate counter map.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Identifiers attached to every request flowing through the system.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    /// Monotonic per process; orders requests in logs.
    pub generation: u64,
}

impl RequestIds {
    pub fn new(generation: u64) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            generation,
        }
    }
}

/// A span measuring elapsed time from creation to explicit end.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    pub fn new(name: &'static str, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            name,
            start: Instant::now(),
            registry,
        }
    }

    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

/// Fixed-capacity ring buffer for histogram samples.
struct SampleRing {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
    total: u64,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
            total: 0,
            capacity,
        }
    }

    fn push(&mut self, value: f64) {
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
        self.total += 1;
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(f64::total_cmp);
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }
}

/// Stores histograms and counters for all named metrics.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, SampleRing>>,
    counters: Mutex<HashMap<&'static str, u64>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
            ring_capacity: 1024,
        }
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| SampleRing::new(self.ring_capacity))
            .push(value_us);
        tracing::trace!(metric = name, value_us, "metric_recorded");
    }

    /// Count an event. Counters never enter a histogram.
    pub fn increment(&self, name: &'static str) {
        *self.counters.lock().entry(name).or_insert(0) += 1;
        tracing::trace!(metric = name, "counter_incremented");
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan::new(name, Arc::clone(self))
    }

    /// Get percentile for a metric (p value 0-100). Returns microseconds.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(name)
            .map(|ring| ring.percentile(p))
            .unwrap_or(0.0)
    }

    /// Total events ever recorded for `name`, counter or histogram.
    pub fn count(&self, name: &str) -> u64 {
        if let Some(&n) = self.counters.lock().get(name) {
            return n;
        }
        self.histograms.lock().get(name).map(|r| r.total).unwrap_or(0)
    }

    /// Current value of every counter, sorted by name.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .iter()
            .map(|(&name, &n)| (name.to_string(), n))
            .collect()
    }

    /// p50/p95/p99 for every histogram, sorted by name.
    pub fn summary(&self) -> BTreeMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, ring)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: ring.percentile(50.0),
                        p95_us: ring.percentile(95.0),
                        p99_us: ring.percentile(99.0),
                        count: ring.total,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: u64,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const PREPROCESS: &str = "t_preprocess";
    pub const OCR_RECOGNIZE: &str = "t_ocr_recognize";
    pub const FILTER_CLUSTER: &str = "t_filter_cluster";
    pub const CLASSIFY: &str = "t_classify";
    pub const PIPELINE_TOTAL: &str = "t_pipeline_total";
    pub const QUEUE_WAIT_OCR: &str = "queue_wait_ocr";
    pub const OCR_CACHE_HIT: &str = "ocr_cache_hit";
    pub const OCR_CACHE_MISS: &str = "ocr_cache_miss";
}
