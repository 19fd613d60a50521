//! Metrics and telemetry for the query engine
//!
//! Process-wide Prometheus collectors for command throughput and latency,
//! backend fetches and the metadata cache. The server exposes them in the
//! text exposition format at `GET /metrics`.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    // === Commands ===

    /// Commands executed, by command name and outcome
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "mqe_queries_total",
        "Total commands executed",
        &["command", "status"]
    ).unwrap();

    /// Command latency
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "mqe_query_duration_seconds",
        "Command execution latency in seconds",
        &["command"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // === Backends ===

    /// Single-series fetches, by outcome
    pub static ref SERIES_FETCHES: CounterVec = register_counter_vec!(
        "mqe_series_fetches_total",
        "Total single-series backend fetches",
        &["status"]
    ).unwrap();

    /// Metadata cache hits, misses, background refreshes and dropped refreshes
    pub static ref CACHE_EVENTS: CounterVec = register_counter_vec!(
        "mqe_metadata_cache_events_total",
        "Metadata cache events",
        &["event"]
    ).unwrap();

    // === Process ===

    /// 1 while the server is serving requests
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "mqe_health_status",
        "Server health (1 = serving)"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    HEALTH_STATUS.set(1.0);
    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a finished command
#[inline]
pub fn record_query(command: &str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    QUERIES_TOTAL.with_label_values(&[command, status]).inc();

    QUERY_DURATION.with_label_values(&[command]).observe(duration_secs);
}
