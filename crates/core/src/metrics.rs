//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Runs (started, finished by outcome)
//! - Tiers and work items (aggregates, durations, attempts, backoffs)
//! - Best-effort notifications (events, progress)
//! - External services (task endpoint)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Runs
// =============================================================================

/// Runs started total.
pub static RUNS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tierflow_runs_started_total", "Total runs started").unwrap()
});

/// Runs finished total by outcome.
pub static RUNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tierflow_runs_finished_total", "Total runs finished"),
        &["outcome"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

/// Runs currently executing.
pub static RUNS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("tierflow_runs_active", "Runs currently executing").unwrap()
});

// =============================================================================
// Tiers and items
// =============================================================================

/// Tiers executed total by aggregate.
pub static TIERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tierflow_tiers_total", "Total tiers executed"),
        &["aggregate"], // "success", "failed", "cancelled"
    )
    .unwrap()
});

/// Tier fan-out duration in seconds.
pub static TIER_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tierflow_tier_duration_seconds",
            "Duration of tier fan-out and fan-in",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
        &["aggregate"],
    )
    .unwrap()
});

/// Work item outcomes total by result.
pub static ITEM_RESULTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tierflow_item_results_total", "Total work item outcomes"),
        &["result"], // "success" or a failure class
    )
    .unwrap()
});

/// Work items currently holding a concurrency slot.
pub static ITEMS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("tierflow_items_in_flight", "Work items currently in flight").unwrap()
});

/// Step attempts total by step.
pub static STEP_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tierflow_step_attempts_total", "Total step attempts"),
        &["step"], // "item", "sequencer", "finalizer", "status", "registration"
    )
    .unwrap()
});

/// Backoff waits total by step.
pub static STEP_BACKOFFS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tierflow_step_backoffs_total", "Total retry backoff waits"),
        &["step"],
    )
    .unwrap()
});

// =============================================================================
// Notifications
// =============================================================================

/// Best-effort notification failures by channel.
pub static NOTIFY_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tierflow_notify_failures_total",
            "Total best-effort notification failures",
        ),
        &["channel", "reason"], // channel: "event", "progress"; reason: "error", "timeout"
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tierflow_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tierflow_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Runs
        Box::new(RUNS_STARTED.clone()),
        Box::new(RUNS_FINISHED.clone()),
        Box::new(RUNS_ACTIVE.clone()),
        // Tiers and items
        Box::new(TIERS_TOTAL.clone()),
        Box::new(TIER_DURATION.clone()),
        Box::new(ITEM_RESULTS.clone()),
        Box::new(ITEMS_IN_FLIGHT.clone()),
        Box::new(STEP_ATTEMPTS.clone()),
        Box::new(STEP_BACKOFFS.clone()),
        // Notifications
        Box::new(NOTIFY_FAILURES.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}
