//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the tierflow server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Run counts by phase (collected dynamically)
//!
//! Orchestrator metrics live in `tierflow_core::metrics` and are
//! registered into the same registry.

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tierflow_core::status::RunFilter;
use tierflow_core::RunPhase;

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
            "tierflow_http_request_duration_seconds",
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
        Opts::new("tierflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "tierflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "tierflow_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tierflow_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tierflow_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tierflow_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// Run Metrics (collected dynamically)
// =============================================================================

/// Runs by current phase, as persisted in the status store.
pub static RUNS_BY_PHASE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("tierflow_runs_by_phase", "Current run count by phase"),
        &["phase"],
    )
    .unwrap()
});

/// Runs tracked by the run service (executing or queued).
pub static RUNS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "tierflow_runs_tracked",
        "Runs executing or queued in this process",
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

    // Runs
    registry.register(Box::new(RUNS_BY_PHASE.clone())).unwrap();
    registry.register(Box::new(RUNS_TRACKED.clone())).unwrap();

    // Core metrics (runs, tiers, items, retries, notifications, task endpoint)
    for metric in tierflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the run gauges reflect the status store.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    RUNS_TRACKED.set(state.runs().active_runs().await as i64);

    for phase in RunPhase::ALL {
        let filter = RunFilter::new().with_phase(phase);
        if let Ok(count) = state.runs().count(&filter) {
            RUNS_BY_PHASE.with_label_values(&[phase.as_str()]).set(count);
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
    fn test_normalize_path_uuid() {
        let path = "/api/v1/runs/550e8400-e29b-41d4-a716-446655440000";
        assert_eq!(normalize_path(path), "/api/v1/runs/{id}");
    }

    #[test]
    fn test_normalize_path_uuid_with_suffix() {
        let path = "/api/v1/runs/550e8400-e29b-41d4-a716-446655440000/cancel";
        assert_eq!(normalize_path(path), "/api/v1/runs/{id}/cancel");
    }

    #[test]
    fn test_normalize_path_numeric() {
        let path = "/api/v1/runs/12345/events";
        assert_eq!(normalize_path(path), "/api/v1/runs/{id}/events");
    }

    #[test]
    fn test_normalize_path_no_ids() {
        let path = "/api/v1/health";
        assert_eq!(normalize_path(path), "/api/v1/health");
    }

    #[test]
    fn test_encode_metrics_returns_prometheus_format() {
        // Access metrics to ensure they're initialized
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = encode_metrics();
        assert!(output.contains("tierflow_http_requests_total"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_registry_contains_core_metrics() {
        // Prometheus only outputs metrics that have been touched
        tierflow_core::metrics::RUNS_STARTED.inc_by(0);
        tierflow_core::metrics::RUNS_ACTIVE.set(0);
        RUNS_BY_PHASE.with_label_values(&["completed"]).set(0);
        WS_CONNECTIONS_TOTAL.inc_by(0);

        let output = encode_metrics();

        assert!(output.contains("tierflow_runs_started_total"));
        assert!(output.contains("tierflow_runs_active"));
        assert!(output.contains("tierflow_runs_by_phase"));
        assert!(output.contains("tierflow_ws_connections_total"));
    }
}
