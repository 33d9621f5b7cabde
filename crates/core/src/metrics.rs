//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Orchestrator (submissions, enqueue failures)
//! - Executor (attempts, outcomes, durations)
//! - Job store (rejected conditional transitions)
//! - Reconciliation sweep

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Orchestrator Metrics
// =============================================================================

/// Jobs accepted by `submit`.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("mediagen_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Enqueue calls that failed after the job row was written.
pub static ENQUEUE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "mediagen_enqueue_failures_total",
        "Total execution messages that could not be enqueued",
    )
    .unwrap()
});

// =============================================================================
// Executor Metrics
// =============================================================================

/// Execution attempts by result.
pub static JOB_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("mediagen_job_attempts_total", "Total execution attempts"),
        &["result"], // "completed", "retrying", "failed", "cancelled", "conflict"
    )
    .unwrap()
});

/// Attempt duration in seconds.
pub static ATTEMPT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "mediagen_attempt_duration_seconds",
            "Duration of a single execution attempt",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["result"],
    )
    .unwrap()
});

/// Attempt failures by kind.
pub static ATTEMPT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagen_attempt_failures_total",
            "Total failed attempts by failure kind",
        ),
        &["kind"], // "transient_provider", "permanent_provider", "storage", "attempt_timeout", "global_timeout"
    )
    .unwrap()
});

/// Jobs reaching a terminal status.
pub static JOB_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagen_job_outcomes_total",
            "Total jobs reaching a terminal status",
        ),
        &["status"],
    )
    .unwrap()
});

/// Executions skipped without touching the job.
pub static DELIVERIES_DISCARDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagen_deliveries_discarded_total",
            "Total deliveries ignored by the executor",
        ),
        &["reason"], // "not_found", "terminal", "already_running", "conflict", "deferred"
    )
    .unwrap()
});

// =============================================================================
// Store Metrics
// =============================================================================

/// Conditional updates rejected because the job changed underneath.
pub static TRANSITION_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagen_transition_rejections_total",
            "Total conditional transitions rejected by a status mismatch",
        ),
        &["transition"],
    )
    .unwrap()
});

// =============================================================================
// Sweep Metrics
// =============================================================================

/// Reconciliation actions by type.
pub static SWEEP_ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "mediagen_sweep_actions_total",
            "Total reconciliation sweep actions",
        ),
        &["action"], // "requeued", "stale_failed", "timed_out", "purged"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Orchestrator
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(ENQUEUE_FAILURES.clone()),
        // Executor
        Box::new(JOB_ATTEMPTS.clone()),
        Box::new(ATTEMPT_DURATION.clone()),
        Box::new(ATTEMPT_FAILURES.clone()),
        Box::new(JOB_OUTCOMES.clone()),
        Box::new(DELIVERIES_DISCARDED.clone()),
        // Store
        Box::new(TRANSITION_REJECTIONS.clone()),
        // Sweep
        Box::new(SWEEP_ACTIONS.clone()),
    ]
}
