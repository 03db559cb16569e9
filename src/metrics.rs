/// Metrics and telemetry for the Nick Hider engine
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Texture resolutions served (fresh, stale, default)
/// - Background fetch scheduling, outcomes and latency
/// - Username lookup cache hit/miss rates
/// - Remote HTTP calls by endpoint and status
/// - Hook failures and circuit breaker trips

use crate::error::{EngineError, EngineResult};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== Resolution Metrics ==========

    /// Texture resolutions by what was served
    pub static ref RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nickhider_resolutions_total",
        "Total number of texture resolutions",
        &["result"]
    )
    .unwrap();

    /// Background fetches queued
    pub static ref FETCHES_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        "nickhider_fetches_scheduled_total",
        "Total number of background texture fetches queued"
    )
    .unwrap();

    /// Background fetch outcomes by failure kind
    pub static ref FETCH_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nickhider_fetch_outcomes_total",
        "Total number of finished texture fetches",
        &["outcome"]
    )
    .unwrap();

    /// Fetches currently running
    pub static ref FETCHES_IN_FLIGHT: IntGauge = register_int_gauge!(
        "nickhider_fetches_in_flight",
        "Number of texture fetches currently running"
    )
    .unwrap();

    /// Whole fetch duration including retries
    pub static ref FETCH_DURATION_SECONDS: Histogram = register_histogram!(
        "nickhider_fetch_duration_seconds",
        "Texture fetch duration in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========== Cache Metrics ==========

    /// Username lookup cache accesses
    pub static ref LOOKUP_CACHE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nickhider_lookup_cache_total",
        "Total number of username lookup cache accesses",
        &["result"]
    )
    .unwrap();

    // ========== Remote Metrics ==========

    /// Remote HTTP calls by endpoint and status
    pub static ref REMOTE_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nickhider_remote_requests_total",
        "Total number of remote HTTP requests",
        &["endpoint", "status"]
    )
    .unwrap();

    // ========== Hook Metrics ==========

    /// Failures reported by host hooks
    pub static ref HOOK_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nickhider_hook_failures_total",
        "Total number of hook failures",
        &["hook"]
    )
    .unwrap();

    /// Times the hook circuit breaker opened
    pub static ref BREAKER_TRIPS_TOTAL: IntCounter = register_int_counter!(
        "nickhider_breaker_trips_total",
        "Total number of hook circuit breaker trips"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> EngineResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| EngineError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| EngineError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

/// Record a remote HTTP call
pub fn record_remote_request(endpoint: &str, status: u16) {
    REMOTE_REQUESTS_TOTAL
        .with_label_values(&[endpoint, &status.to_string()])
        .inc();
}

/// Record a failed remote HTTP call that never got a status
pub fn record_remote_transport_error(endpoint: &str) {
    REMOTE_REQUESTS_TOTAL
        .with_label_values(&[endpoint, "transport_error"])
        .inc();
}

/// Record a hook failure
pub fn record_hook_failure(hook: &str) {
    HOOK_FAILURES_TOTAL.with_label_values(&[hook]).inc();
}
