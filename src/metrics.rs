/// Metrics and telemetry for Modguard
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Moderation actions by kind
/// - Message scanning outcomes
/// - Background job execution and counter drift
/// - Errors by code

use crate::error::{ModError, ModResult};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap();

    /// Active HTTP requests
    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "http_requests_active",
        "Number of HTTP requests currently being processed"
    )
    .unwrap();

    // ========== Moderation Metrics ==========

    /// Committed moderation actions by kind
    pub static ref MODERATION_ACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "moderation_actions_total",
        "Total number of moderation actions recorded",
        &["action"]
    )
    .unwrap();

    // ========== Scanner Metrics ==========

    /// Messages scanned, by outcome
    pub static ref FILTER_CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "filter_checks_total",
        "Total number of messages scanned",
        &["result"]
    )
    .unwrap();

    /// Violations found in blocked messages
    pub static ref BLOCKED_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "blocked_messages_total",
        "Violations found in blocked messages",
        &["violation"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .unwrap();

    /// Audits that found cached counters out of step with the ledger
    pub static ref COUNTER_DRIFT_TOTAL: IntCounter = register_int_counter!(
        "counter_drift_total",
        "Number of counter audits that found and repaired drift"
    )
    .unwrap();

    // ========== Error Metrics ==========

    /// Errors by error code
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "errors_total",
        "Total number of errors",
        &["error_type", "module"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> ModResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ModError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ModError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a committed moderation action
pub fn record_moderation_action(action: &str) {
    MODERATION_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

/// Record a scanned message
pub fn record_filter_check(blocked: bool) {
    FILTER_CHECKS_TOTAL
        .with_label_values(&[if blocked { "blocked" } else { "allowed" }])
        .inc();
}

/// Record one violation of a blocked message
pub fn record_blocked_message(violation: &str) {
    BLOCKED_MESSAGES_TOTAL.with_label_values(&[violation]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

/// Record a repaired counter drift
pub fn record_counter_drift() {
    COUNTER_DRIFT_TOTAL.inc();
}

/// Record an error
pub fn record_error(error_type: &str, module: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, module])
        .inc();
}
