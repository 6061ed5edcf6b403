//! Metrics sink consumed by every pipeline stage.
//!
//! Counters, gauges and latency histograms with atomic updates; the control
//! plane pulls [`MetricsSnapshot`]s for its health and metrics endpoints.

pub mod metrics;

pub use metrics::{
    HistogramPercentiles, LatencyTimer, MetricsSink, MetricsSnapshot, DEFAULT_BUCKETS_NS,
};
