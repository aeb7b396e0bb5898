//! Metrics and observability utilities
//!
//! Prometheus metrics with latency histograms and standardized naming
//! conventions. The exporter itself is installed by the gateway binary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all SiteForge metrics
pub const METRICS_PREFIX: &str = "siteforge";

/// Histogram buckets for query latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Buckets for ingestion latency (crawl + embed + store)
pub const INGESTION_BUCKETS: &[f64] = &[
    0.250,
    0.500,
    1.000,
    2.500,
    5.000,
    10.00,
    30.00,
    60.00,
    120.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
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

    // Query metrics
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of answered queries"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end query latency in seconds"
    );

    describe_gauge!(
        format!("{}_query_results_count", METRICS_PREFIX),
        Unit::Count,
        "Evidence items returned by the last query"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_ingestions_total", METRICS_PREFIX),
        Unit::Count,
        "Total ingestion runs"
    );

    describe_counter!(
        format!("{}_chunks_stored_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks stored"
    );

    describe_counter!(
        format!("{}_failed_documents_total", METRICS_PREFIX),
        Unit::Count,
        "Total pages that failed to ingest"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Ingestion latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Backend lifecycle
    describe_counter!(
        format!("{}_backend_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Optional backends that were unavailable at startup"
    );

    describe_counter!(
        format!("{}_backend_close_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Backend handles that failed to close"
    );

    describe_counter!(
        format!("{}_retrieval_source_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Retrieval sources that failed during a query"
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

/// Helper to record query metrics
pub fn record_query(duration_secs: f64, iterations: usize, result_count: usize) {
    counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        "iterations" => iterations.to_string()
    )
    .increment(1);

    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX)).record(duration_secs);

    gauge!(format!("{}_query_results_count", METRICS_PREFIX)).set(result_count as f64);
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
        tracing::trace!(model, batch_size, duration_secs, "Embedding batch recorded");
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, chunks_stored: usize, failed_documents: usize) {
    let status = if chunks_stored > 0 { "success" } else { "failed" };

    counter!(
        format!("{}_ingestions_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    counter!(format!("{}_chunks_stored_total", METRICS_PREFIX)).increment(chunks_stored as u64);

    counter!(format!("{}_failed_documents_total", METRICS_PREFIX))
        .increment(failed_documents as u64);

    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// An optional backend could not be reached at startup
pub fn record_degradation(backend: &str) {
    counter!(
        format!("{}_backend_degraded_total", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// A backend close attempt failed during shutdown
pub fn record_close_failure(backend: &str) {
    counter!(
        format!("{}_backend_close_failures_total", METRICS_PREFIX),
        "backend" => backend.to_string()
    )
    .increment(1);
}

/// A single retrieval source failed; the query carried on without it
pub fn record_retrieval_error(source: &str) {
    counter!(
        format!("{}_retrieval_source_errors_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(1);
}
