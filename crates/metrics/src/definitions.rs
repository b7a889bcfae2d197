//! Metric name and label definitions.
//!
//! Every metric the scheduler records is named here so dashboards have one
//! place to look.

/// Due checks, task creation, claims, and outcomes.
pub mod scheduler {
    /// Completed due-check passes (normal and forced)
    pub const DUE_CHECKS_TOTAL: &str = "autopilot_scheduler_due_checks_total";
    /// Agents found due by the most recent due check
    pub const AGENTS_DUE: &str = "autopilot_scheduler_agents_due";
    /// Tasks created by due checks and manual runs
    pub const TASKS_CREATED_TOTAL: &str = "autopilot_scheduler_tasks_created_total";
    /// Lost `next_run_at` swaps, i.e. another instance fired the agent first
    pub const NEXT_RUN_CONFLICTS_TOTAL: &str = "autopilot_scheduler_next_run_conflicts_total";
    /// Pending tasks returned by the most recent poll
    pub const TASKS_READY: &str = "autopilot_scheduler_tasks_ready";
    /// Successful pending → running claims
    pub const TASKS_CLAIMED_TOTAL: &str = "autopilot_scheduler_tasks_claimed_total";
    /// Claims rejected because the task was already taken
    pub const CLAIM_CONFLICTS_TOTAL: &str = "autopilot_scheduler_claim_conflicts_total";
    /// Terminal outcomes by status
    pub const OUTCOMES_TOTAL: &str = "autopilot_scheduler_outcomes_total";
    /// Reported generation time of finished tasks in seconds
    pub const GENERATION_DURATION_SECONDS: &str =
        "autopilot_scheduler_generation_duration_seconds";
    /// Retries granted
    pub const RETRIES_TOTAL: &str = "autopilot_scheduler_retries_total";
    /// Tasks failed after exhausting their retries
    pub const RETRIES_EXHAUSTED_TOTAL: &str = "autopilot_scheduler_retries_exhausted_total";
    /// Tasks cancelled
    pub const TASKS_CANCELLED_TOTAL: &str = "autopilot_scheduler_tasks_cancelled_total";
    /// Finished tasks removed by retention cleanup
    pub const TASKS_CLEANED_TOTAL: &str = "autopilot_scheduler_tasks_cleaned_total";
}

/// Configuration metrics
pub mod config {
    /// Diagnostics reported at startup, by severity
    pub const DIAGNOSTICS_TOTAL: &str = "autopilot_config_diagnostics_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const STATUS: &str = "status";
    pub const SEVERITY: &str = "severity";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Generation durations in seconds.
    /// Covers 1 second to 30 minutes
    pub static GENERATION_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0, 1200.0, 1800.0,
        ]
    });
}
