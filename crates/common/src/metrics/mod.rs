//! Metrics and observability utilities
//!
//! Provides Prometheus metric descriptions and recording helpers
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::{Duration, Instant};

/// Metrics prefix for all CliniCheck metrics
pub const METRICS_PREFIX: &str = "clinicheck";

/// Histogram buckets for reasoner round trips (in seconds)
pub const REASONER_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    20.00, // 20s
    30.00, // 30s
    60.00, // 60s
    120.0, // 2m
];

/// Name of the reasoner latency histogram
pub fn reasoner_duration_metric() -> String {
    format!("{}_reasoner_duration_seconds", METRICS_PREFIX)
}

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Reasoner metrics
    describe_counter!(
        format!("{}_reasoner_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total reasoner round trips by outcome"
    );

    describe_histogram!(
        reasoner_duration_metric(),
        Unit::Seconds,
        "Reasoner round trip latency in seconds"
    );

    // Extraction metrics
    describe_counter!(
        format!("{}_extraction_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Sources that could not be extracted"
    );

    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    // Analysis metrics
    describe_histogram!(
        format!("{}_analysis_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end analysis latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one reasoner round trip. `outcome` is `success`, `rejected`,
/// `unavailable` or `cancelled`.
pub fn record_reasoner_call(duration: Duration, provider: &str, outcome: &'static str) {
    counter!(
        format!("{}_reasoner_requests_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        reasoner_duration_metric(),
        "provider" => provider.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Helper to record a source that failed extraction
pub fn record_extraction_failure(kind: &'static str) {
    counter!(
        format!("{}_extraction_failures_total", METRICS_PREFIX),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_chunks(policy: &'static str, count: usize) {
    counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        "policy" => policy
    )
    .increment(count as u64);
}

/// Helper to record end-to-end analysis metrics
pub fn record_analysis(duration: Duration, template: &'static str, status: &'static str) {
    histogram!(
        format!("{}_analysis_duration_seconds", METRICS_PREFIX),
        "template" => template,
        "status" => status
    )
    .record(duration.as_secs_f64());
}
