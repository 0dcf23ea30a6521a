//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Admission (pipeline slot usage)
//! - Processing workflows (jobs started and finished)
//! - Decisions taken on failed units
//! - Status polling

use once_cell::sync::Lazy;
use prometheus::{IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Admission
// =============================================================================

/// Slots currently held, per pipeline.
pub static ADMISSION_IN_USE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "archivist_admission_slots_in_use",
            "Pipeline slots currently held by jobs",
        ),
        &["pipeline"],
    )
    .unwrap()
});

/// Configured slots, per pipeline.
pub static ADMISSION_CAPACITY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "archivist_admission_slots_capacity",
            "Configured pipeline slots",
        ),
        &["pipeline"],
    )
    .unwrap()
});

// =============================================================================
// Processing
// =============================================================================

/// Jobs that entered a pipeline.
pub static JOBS_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivist_jobs_started_total", "Jobs started per pipeline"),
        &["pipeline"],
    )
    .unwrap()
});

/// Jobs that reached a final status.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "archivist_jobs_completed_total",
            "Jobs finished by final status",
        ),
        &["status"], // "done", "error", "abandoned"
    )
    .unwrap()
});

/// Decisions received for failed units.
pub static DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivist_decisions_total", "Decisions taken on failed units"),
        &["decision"], // "retry", "retry_once", "abandon", "timeout"
    )
    .unwrap()
});

// =============================================================================
// Polling
// =============================================================================

/// Status checks by classified outcome.
pub static POLL_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("archivist_poll_attempts_total", "Status checks by outcome"),
        &["outcome"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(ADMISSION_IN_USE.clone()),
        Box::new(ADMISSION_CAPACITY.clone()),
        Box::new(JOBS_STARTED.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(DECISIONS.clone()),
        Box::new(POLL_ATTEMPTS.clone()),
    ]
}
