use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref SUBMISSIONS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "registry_submissions_total",
        "Total telemetry submissions received"
    ))
    .unwrap();
    pub static ref ACCEPTED_SUBMISSIONS_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "registry_submissions_accepted_total",
        "Total telemetry submissions stored"
    ))
    .unwrap();
    pub static ref REJECTED_SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "registry_submissions_rejected_total",
            "Total telemetry submissions rejected, by reason"
        ),
        &["reason"]
    )
    .unwrap();
    pub static ref STORE_FAILURES_TOTAL: IntCounter = IntCounter::with_opts(Opts::new(
        "registry_store_failures_total",
        "Total device directory or telemetry store failures"
    ))
    .unwrap();
    pub static ref QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("registry_queries_total", "Total telemetry queries, by format"),
        &["format"]
    )
    .unwrap();
    pub static ref APPEND_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "registry_append_latency_seconds",
            "Time taken to append a record to the telemetry store"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref QUERY_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "registry_query_latency_seconds",
            "Time taken to read a telemetry window from the store"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(SUBMISSIONS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(ACCEPTED_SUBMISSIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(REJECTED_SUBMISSIONS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(STORE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY.register(Box::new(QUERIES_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(APPEND_LATENCY_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(QUERY_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
