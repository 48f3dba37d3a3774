//! Prometheus metrics for the cloudperf coordinator
//!
//! This module provides metrics tracking for:
//! - Poll protocol: polls and dispatched jobs per agent role, ingested and skipped results
//! - Scheduler: refresh cycle outcomes and job backlog
//! - HTTP API: requests per endpoint and status, request duration
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Poll protocol and scheduler metrics
struct ProtocolMetrics {
    polls: CounterVec,
    jobs_dispatched: CounterVec,
    results_ingested: CounterVec,
    results_skipped: Counter,
    refresh: CounterVec,
    queue_depth: Gauge,
    poll_duration: HistogramVec,
}

/// HTTP API metrics
struct ApiMetrics {
    requests: CounterVec,
    duration: HistogramVec,
}

static PROTOCOL_METRICS: OnceLock<ProtocolMetrics> = OnceLock::new();

static API_METRICS: OnceLock<ApiMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
/// If registration fails the error is returned and every `record_*`
/// function stays a no-op.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = cloudperf::metrics::init_metrics() {
///     tracing::warn!(error = %e, "Metrics initialization failed");
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let protocol = ProtocolMetrics {
        polls: register_counter_vec!(
            "cloudperf_polls_total",
            "Total agent polls by resolved role",
            &["role"]
        )?,
        jobs_dispatched: register_counter_vec!(
            "cloudperf_jobs_dispatched_total",
            "Total jobs handed to agents by role",
            &["role"]
        )?,
        results_ingested: register_counter_vec!(
            "cloudperf_results_ingested_total",
            "Total agent results applied, by kind (discovery addresses, latency rows)",
            &["kind"]
        )?,
        results_skipped: register_counter!(
            "cloudperf_results_skipped_total",
            "Total agent result entries skipped as malformed or unattributable"
        )?,
        refresh: register_counter_vec!(
            "cloudperf_refresh_total",
            "Total range refresh cycles by outcome",
            &["outcome"]
        )?,
        queue_depth: register_gauge!(
            "cloudperf_queue_depth",
            "Discovery jobs waiting in the queue at last observation"
        )?,
        poll_duration: register_histogram_vec!(
            "cloudperf_poll_duration_seconds",
            "Time spent handling one agent poll",
            &["role"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        )?,
    };

    let api = ApiMetrics {
        requests: register_counter_vec!(
            "cloudperf_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        duration: register_histogram_vec!(
            "cloudperf_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
        )?,
    };

    PROTOCOL_METRICS
        .set(protocol)
        .map_err(|_| "Protocol metrics already initialized")?;
    API_METRICS
        .set(api)
        .map_err(|_| "API metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PROTOCOL_METRICS.get().is_some() && API_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one agent poll
pub fn record_poll(role: &str) {
    if let Some(m) = PROTOCOL_METRICS.get() {
        m.polls.with_label_values(&[role]).inc();
    }
}

/// Record jobs handed out in one poll response
pub fn record_jobs_dispatched(role: &str, count: usize) {
    let Some(m) = PROTOCOL_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.jobs_dispatched
            .with_label_values(&[role])
            .inc_by(count as f64);
    }
}

/// Record applied results (`kind` is `discovery` or `latency`)
pub fn record_results_ingested(kind: &str, count: usize) {
    let Some(m) = PROTOCOL_METRICS.get() else {
        return;
    };

    if count > 0 {
        m.results_ingested
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }
}

/// Record skipped result entries
pub fn record_results_skipped(count: usize) {
    if let Some(m) = PROTOCOL_METRICS.get() {
        if count > 0 {
            m.results_skipped.inc_by(count as f64);
        }
    }
}

/// Record a refresh cycle outcome
pub fn record_refresh(outcome: &str) {
    if let Some(m) = PROTOCOL_METRICS.get() {
        m.refresh.with_label_values(&[outcome]).inc();
    }
}

/// Update the observed job backlog
pub fn set_queue_depth(depth: usize) {
    if let Some(m) = PROTOCOL_METRICS.get() {
        m.queue_depth.set(depth as f64);
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = API_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a poll timer for the given role
pub fn start_poll_timer(role: &str) -> MetricsTimer {
    match PROTOCOL_METRICS.get() {
        Some(m) => MetricsTimer::new(m.poll_duration.with_label_values(&[role]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
