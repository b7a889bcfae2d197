//! Operational counters over stored tasks.

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
};

use crate::{
    schedule::resolve_local,
    types::{Task, TaskStats, TaskStatus, TimeOfDay},
};

/// Incremental mean that keeps no sample history.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningMean {
    mean: f64,
    count: u64,
}

impl RunningMean {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a stored average over `count` samples.
    #[must_use]
    pub fn from_parts(mean: f64, count: u64) -> Self {
        Self { mean, count }
    }

    /// `avg' = avg + (x - avg) / (n + 1)`
    pub fn push(&mut self, sample: f64) {
        self.count += 1;
        self.mean += (sample - self.mean) / self.count as f64;
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Start of `now`'s calendar day in `tz`.
#[must_use]
pub fn start_of_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let date = now.with_timezone(&tz).date_naive();
    resolve_local(tz, date, TimeOfDay::MIDNIGHT)
}

/// Aggregate dashboard counters.
///
/// "Today" starts at local midnight in `reference_tz`. The average covers
/// completed tasks that reported a generation time; the rest are left out of
/// the denominator.
#[must_use]
pub fn compute_stats<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    now: DateTime<Utc>,
    reference_tz: Tz,
    task_type: &str,
) -> TaskStats {
    let today = start_of_day(now, reference_tz);
    let completed_since_today =
        |t: &Task| t.completed_at.is_some_and(|completed| completed >= today);

    let mut stats = TaskStats {
        task_type: task_type.to_string(),
        ..TaskStats::default()
    };
    let mut mean = RunningMean::new();

    for task in tasks {
        match task.status {
            TaskStatus::Pending => stats.pending_count += 1,
            TaskStatus::Running => stats.running_count += 1,
            TaskStatus::Completed => {
                if completed_since_today(task) {
                    stats.completed_today += 1;
                }
                if task.task_type == task_type {
                    stats.total_completed_of_type += 1;
                }
                if let Some(ms) = task.result.as_ref().and_then(|r| r.generation_time_ms) {
                    mean.push(ms as f64);
                }
            },
            TaskStatus::Failed => {
                if completed_since_today(task) {
                    stats.failed_today += 1;
                }
            },
            TaskStatus::Cancelled => {},
        }
    }

    stats.average_generation_ms = mean.mean();
    stats.timed_samples = mean.count();
    stats
}
