//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the Archivist server:
//! - HTTP request metrics (latency, counts)
//! - Monitor WebSocket connection metrics
//! - Jobs by status (collected at scrape time)
//!
//! Engine metrics (admission slots, job outcomes, decisions, polling) live in
//! `archivist_core::metrics` and are registered here as well.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tracing::warn;

use archivist_core::JobStatus;

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "archivist_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivist_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "archivist_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active monitor connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "archivist_ws_connections_active",
        "Number of active monitor WebSocket connections",
    )
    .unwrap()
});

/// Total monitor connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "archivist_ws_connections_total",
        "Total monitor WebSocket connections since startup",
    )
    .unwrap()
});

/// Monitor messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivist_ws_messages_sent_total", "Monitor messages sent"),
        &["type"],
    )
    .unwrap()
});

/// Lag events (a client fell behind and skipped events).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "archivist_ws_lag_events_total",
        "Monitor lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs by current status (collected at scrape time).
pub static JOBS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("archivist_jobs_by_status", "Current job count by status"),
        &["status"],
    )
    .unwrap()
});

/// Running workflow instances.
pub static WORKFLOWS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "archivist_workflows_running",
        "Workflow instances currently running",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // Jobs
    registry
        .register(Box::new(JOBS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(WORKFLOWS_RUNNING.clone()))
        .unwrap();

    // Engine
    for metric in archivist_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Refresh gauges derived from application state before encoding.
pub fn collect_dynamic_metrics(state: &AppState) {
    let service = state.service();
    WORKFLOWS_RUNNING.set(service.host().running_count() as i64);

    for status in JobStatus::ALL {
        match service.store().count(Some(status)) {
            Ok(count) => JOBS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(count),
            Err(e) => warn!(status = %status, error = %e, "Failed to count jobs"),
        }
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    static UUID: Lazy<regex_lite::Regex> = Lazy::new(|| {
        regex_lite::Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap()
    });
    static NUMERIC: Lazy<regex_lite::Regex> =
        Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").unwrap());

    let result = UUID.replace_all(path, "{id}");
    let result = NUMERIC.replace_all(&result, "/{id}$1");
    result.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_job_id() {
        assert_eq!(normalize_path("/api/v1/jobs/42"), "/api/v1/jobs/{id}");
    }

    #[test]
    fn test_normalize_path_numeric_middle() {
        assert_eq!(
            normalize_path("/api/v1/jobs/12345/decision"),
            "/api/v1/jobs/{id}/decision"
        );
    }

    #[test]
    fn test_normalize_path_uuid() {
        let path = "/api/v1/workflows/processing-workflow-550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(
            normalize_path(path),
            "/api/v1/workflows/processing-workflow-{id}"
        );
    }

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/v1/jobs/bulk"), "/api/v1/jobs/bulk");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("archivist_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_engine_metrics() {
        HTTP_REQUESTS_IN_FLIGHT.set(0);
        WS_CONNECTIONS_ACTIVE.set(0);
        JOBS_BY_STATUS.with_label_values(&["error"]).set(0);
        archivist_core::metrics::JOBS_STARTED
            .with_label_values(&["am"])
            .inc_by(0);
        archivist_core::metrics::ADMISSION_CAPACITY
            .with_label_values(&["am"])
            .set(1);

        let output = encode_metrics();

        assert!(output.contains("archivist_http_requests_in_flight"));
        assert!(output.contains("archivist_ws_connections_active"));
        assert!(output.contains("archivist_jobs_by_status"));
        assert!(output.contains("archivist_jobs_started_total"));
        assert!(output.contains("archivist_admission_slots_capacity"));
    }
}
