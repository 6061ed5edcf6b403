//! Metrics Sink
//!
//! Every stage of the pipeline reports into a shared [`MetricsSink`]:
//!
//! - **Counters**: monotone `u64` totals (frames published, drops, errors)
//! - **Gauges**: last-write-wins `f64` values (active clients, queue depths)
//! - **Histograms**: latency distributions over fixed nanosecond buckets with
//!   per-bucket atomic counters and an atomic running max
//!
//! Updates are a map read plus one atomic op on the hot path; the map itself
//! only takes the write lock the first time a metric name is seen. Snapshots
//! serialize the full state, with histograms reduced to
//! p50/p95/p99/p999/max/count, which is what the control plane exposes.
//!
//! The sink is an `Arc` handed to each component; nothing here is global.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;

/// Default histogram bucket upper bounds in nanoseconds
/// (100µs, 500µs, 1ms, 2ms, 5ms, 10ms, 50ms).
pub const DEFAULT_BUCKETS_NS: [u64; 7] = [
    100_000, 500_000, 1_000_000, 2_000_000, 5_000_000, 10_000_000, 50_000_000,
];

/// Percentile summary of one latency histogram.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramPercentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub max: u64,
    pub count: u64,
}

/// Latency histogram over fixed bucket bounds. The last slot is the overflow
/// bucket for samples above every bound.
struct LatencyHistogram {
    bounds: Vec<u64>,
    counts: Vec<AtomicU64>,
    total: AtomicU64,
    max: AtomicU64,
}

impl LatencyHistogram {
    fn new(bounds: &[u64]) -> Self {
        let counts = (0..bounds.len() + 1).map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds: bounds.to_vec(),
            counts,
            total: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    fn record(&self, value_ns: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut current_max = self.max.load(Ordering::Relaxed);
        while value_ns > current_max {
            match self.max.compare_exchange_weak(
                current_max,
                value_ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_max = observed,
            }
        }

        let idx = self
            .bounds
            .iter()
            .position(|&bound| value_ns <= bound)
            .unwrap_or(self.bounds.len());
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
    }

    fn percentiles(&self) -> HistogramPercentiles {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return HistogramPercentiles::default();
        }

        let mut cumulative = Vec::with_capacity(self.counts.len());
        let mut running = 0u64;
        for count in &self.counts {
            running += count.load(Ordering::Relaxed);
            cumulative.push(running);
        }

        let max = self.max.load(Ordering::Relaxed);
        let find = |p: f64| -> u64 {
            let target = (total as f64 * p / 100.0) as u64;
            for (i, &cum) in cumulative.iter().enumerate() {
                if cum >= target {
                    return if i < self.bounds.len() {
                        self.bounds[i]
                    } else {
                        max
                    };
                }
            }
            max
        };

        HistogramPercentiles {
            p50: find(50.0),
            p95: find(95.0),
            p99: find(99.0),
            p999: find(99.9),
            max,
            count: total,
        }
    }
}

/// Serializable snapshot of the whole sink.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramPercentiles>,
}

pub struct MetricsSink {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    /// Gauge values stored as `f64::to_bits`.
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<String, Arc<LatencyHistogram>>>,
    bucket_bounds: Vec<u64>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::with_buckets(&DEFAULT_BUCKETS_NS)
    }

    /// Sink whose histograms use the given nanosecond bucket bounds.
    pub fn with_buckets(bounds: &[u64]) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            bucket_bounds: bounds.to_vec(),
        }
    }

    pub fn inc_counter(&self, name: &str, delta: u64) {
        if let Some(counter) = self.counters.read().unwrap().get(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        let mut counters = self.counters.write().unwrap();
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .unwrap()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        if let Some(gauge) = self.gauges.read().unwrap().get(name) {
            gauge.store(value.to_bits(), Ordering::Relaxed);
            return;
        }
        let mut gauges = self.gauges.write().unwrap();
        gauges
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges
            .read()
            .unwrap()
            .get(name)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    pub fn record_latency(&self, name: &str, value_ns: u64) {
        if let Some(histogram) = self.histograms.read().unwrap().get(name) {
            histogram.record(value_ns);
            return;
        }
        let histogram = {
            let mut histograms = self.histograms.write().unwrap();
            histograms
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(LatencyHistogram::new(&self.bucket_bounds)))
                .clone()
        };
        histogram.record(value_ns);
    }

    pub fn latency_percentiles(&self, name: &str) -> Option<HistogramPercentiles> {
        self.histograms
            .read()
            .unwrap()
            .get(name)
            .map(|h| h.percentiles())
    }

    /// Start a timer that records into histogram `name` when dropped.
    pub fn latency_timer(&self, name: &'static str) -> LatencyTimer<'_> {
        LatencyTimer {
            sink: self,
            name,
            start: Instant::now(),
            cancelled: false,
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .unwrap()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.load(Ordering::Relaxed)))
            .collect();
        let gauges = self
            .gauges
            .read()
            .unwrap()
            .iter()
            .map(|(name, gauge)| (name.clone(), f64::from_bits(gauge.load(Ordering::Relaxed))))
            .collect();
        let histograms = self
            .histograms
            .read()
            .unwrap()
            .iter()
            .map(|(name, histogram)| (name.clone(), histogram.percentiles()))
            .collect();
        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that records the elapsed wall time into a latency histogram on drop.
pub struct LatencyTimer<'a> {
    sink: &'a MetricsSink,
    name: &'static str,
    start: Instant,
    cancelled: bool,
}

impl LatencyTimer<'_> {
    pub fn cancel(mut self) {
        self.cancelled = true;
    }
}

impl Drop for LatencyTimer<'_> {
    fn drop(&mut self) {
        if !self.cancelled {
            let elapsed_ns = self.start.elapsed().as_nanos() as u64;
            self.sink.record_latency(self.name, elapsed_ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Counters
    // ---------------------------------------------------------------

    #[test]
    fn test_counter_starts_at_zero() {
        let sink = MetricsSink::new();
        assert_eq!(sink.counter("missing"), 0);
    }

    #[test]
    fn test_counter_increments() {
        let sink = MetricsSink::new();
        sink.inc_counter("frames_total", 1);
        sink.inc_counter("frames_total", 41);
        assert_eq!(sink.counter("frames_total"), 42);
    }

    #[test]
    fn test_counters_are_independent() {
        let sink = MetricsSink::new();
        sink.inc_counter("a", 1);
        sink.inc_counter("b", 2);
        assert_eq!(sink.counter("a"), 1);
        assert_eq!(sink.counter("b"), 2);
    }

    #[test]
    fn test_counter_concurrent_increments() {
        let sink = Arc::new(MetricsSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        sink.inc_counter("hits", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sink.counter("hits"), 8000);
    }

    // ---------------------------------------------------------------
    // Gauges
    // ---------------------------------------------------------------

    #[test]
    fn test_gauge_set_and_get() {
        let sink = MetricsSink::new();
        sink.set_gauge("active_clients", 3.0);
        assert_eq!(sink.gauge("active_clients"), 3.0);
        sink.set_gauge("active_clients", 0.5);
        assert_eq!(sink.gauge("active_clients"), 0.5);
    }

    #[test]
    fn test_gauge_missing_is_zero() {
        let sink = MetricsSink::new();
        assert_eq!(sink.gauge("missing"), 0.0);
    }

    // ---------------------------------------------------------------
    // Histograms
    // ---------------------------------------------------------------

    #[test]
    fn test_histogram_percentiles_empty() {
        let sink = MetricsSink::new();
        assert_eq!(sink.latency_percentiles("missing"), None);
    }

    #[test]
    fn test_histogram_single_sample() {
        let sink = MetricsSink::new();
        sink.record_latency("lat", 150_000);
        let p = sink.latency_percentiles("lat").unwrap();
        assert_eq!(p.count, 1);
        assert_eq!(p.max, 150_000);
        // With one sample the truncated rank is 0, which the cumulative walk
        // satisfies at the first bucket bound.
        assert_eq!(p.p50, 100_000);
        assert_eq!(p.p999, 100_000);
    }

    #[test]
    fn test_histogram_percentile_spread() {
        let sink = MetricsSink::new();
        // 90 fast samples in the first bucket, 10 slow ones in the 10ms bucket
        for _ in 0..90 {
            sink.record_latency("lat", 50_000);
        }
        for _ in 0..10 {
            sink.record_latency("lat", 8_000_000);
        }
        let p = sink.latency_percentiles("lat").unwrap();
        assert_eq!(p.count, 100);
        assert_eq!(p.p50, 100_000);
        assert_eq!(p.p99, 10_000_000);
        assert_eq!(p.max, 8_000_000);
    }

    #[test]
    fn test_histogram_overflow_bucket_reports_max() {
        let sink = MetricsSink::new();
        sink.record_latency("lat", 90_000_000); // above every bound
        sink.record_latency("lat", 99_000_000);
        let p = sink.latency_percentiles("lat").unwrap();
        assert_eq!(p.p50, 99_000_000);
        assert_eq!(p.max, 99_000_000);
    }

    #[test]
    fn test_histogram_tracks_running_max() {
        let sink = MetricsSink::new();
        sink.record_latency("lat", 10);
        sink.record_latency("lat", 5_000);
        sink.record_latency("lat", 700);
        assert_eq!(sink.latency_percentiles("lat").unwrap().max, 5_000);
    }

    #[test]
    fn test_custom_buckets() {
        let sink = MetricsSink::with_buckets(&[10, 100]);
        sink.record_latency("lat", 7);
        let p = sink.latency_percentiles("lat").unwrap();
        assert_eq!(p.p50, 10);
    }

    // ---------------------------------------------------------------
    // Latency timer
    // ---------------------------------------------------------------

    #[test]
    fn test_latency_timer_records_on_drop() {
        let sink = Arc::new(MetricsSink::new());
        {
            let _timer = sink.latency_timer("timed_op_ns");
        }
        assert_eq!(sink.latency_percentiles("timed_op_ns").unwrap().count, 1);
    }

    #[test]
    fn test_latency_timer_cancel() {
        let sink = Arc::new(MetricsSink::new());
        sink.latency_timer("timed_op_ns").cancel();
        assert!(sink.latency_percentiles("timed_op_ns").is_none());
    }

    // ---------------------------------------------------------------
    // Snapshot
    // ---------------------------------------------------------------

    #[test]
    fn test_snapshot_contents() {
        let sink = MetricsSink::new();
        sink.inc_counter("frames", 5);
        sink.set_gauge("clients", 2.0);
        sink.record_latency("lat", 1_000);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counters["frames"], 5);
        assert_eq!(snapshot.gauges["clients"], 2.0);
        assert_eq!(snapshot.histograms["lat"].count, 1);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let sink = MetricsSink::new();
        sink.inc_counter("frames", 1);
        sink.record_latency("lat", 42);
        let json = serde_json::to_value(sink.snapshot()).unwrap();
        assert_eq!(json["counters"]["frames"], 1);
        assert!(json["histograms"]["lat"]["p50"].is_u64());
    }
}
