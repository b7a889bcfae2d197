//! Core data types for agent schedules and scheduled tasks.

use std::{collections::BTreeSet, fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result, parse::parse_time_of_day, stats::RunningMean};

/// Task type used when a schedule does not name one.
pub const DEFAULT_TASK_TYPE: &str = "generate-article";

/// Retry ceiling for tasks created without an explicit one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

// ── Schedules ───────────────────────────────────────────────────────────────

/// Wall-clock time of day, serialised as `"HH:MM"` (24h).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    /// 09:00, used when a daily/weekly/monthly schedule has no time.
    pub const DEFAULT: Self = Self { hour: 9, minute: 0 };
    pub const MIDNIGHT: Self = Self { hour: 0, minute: 0 };

    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(Error::schedule_config(format!(
                "time of day out of range: {hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    #[must_use]
    pub fn hour(self) -> u8 {
        self.hour
    }

    #[must_use]
    pub fn minute(self) -> u8 {
        self.minute
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_time_of_day(s)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// How often an agent runs. Only the fields meaningful for a frequency exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "frequency",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Recurrence {
    /// Top of every clock hour.
    Hourly,
    /// Once a day at `time` (default 09:00).
    Daily {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<TimeOfDay>,
    },
    /// On each listed weekday (0 = Sunday) at `time`. Defaults to Monday.
    Weekly {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<TimeOfDay>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days_of_week: Option<BTreeSet<u8>>,
    },
    /// On `day_of_month` (default 1st) at `time`, clamped to the month's last day.
    Monthly {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<TimeOfDay>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day_of_month: Option<u8>,
    },
}

impl Recurrence {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily { .. } => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly { .. } => "monthly",
        }
    }
}

/// Recurrence settings attached to an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub recurrence: Recurrence,
    /// IANA zone the time-of-day fields are evaluated in.
    pub timezone: String,
}

fn default_true() -> bool {
    true
}

impl ScheduleSpec {
    #[must_use]
    pub fn new(recurrence: Recurrence, timezone: impl Into<String>) -> Self {
        Self {
            enabled: true,
            recurrence,
            timezone: timezone.into(),
        }
    }

    /// Resolve the IANA timezone name.
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|_| Error::unknown_timezone(&self.timezone))
    }

    /// Reject specs that are missing what their frequency needs.
    ///
    /// Absent optional fields fall back to their documented defaults; a field
    /// that is present but unusable is an error.
    pub fn validate(&self) -> Result<()> {
        self.tz()?;
        match &self.recurrence {
            Recurrence::Hourly | Recurrence::Daily { .. } => Ok(()),
            Recurrence::Weekly { days_of_week, .. } => match days_of_week {
                Some(days) if days.is_empty() => Err(Error::schedule_config(
                    "weekly schedule has an empty daysOfWeek",
                )),
                Some(days) => match days.iter().find(|d| **d > 6) {
                    Some(bad) => Err(Error::schedule_config(format!(
                        "day of week out of range (0-6): {bad}"
                    ))),
                    None => Ok(()),
                },
                None => Ok(()),
            },
            Recurrence::Monthly { day_of_month, .. } => match day_of_month {
                Some(day) if !(1..=31).contains(day) => Err(Error::schedule_config(format!(
                    "day of month out of range (1-31): {day}"
                ))),
                _ => Ok(()),
            },
        }
    }
}

// ── Agents ──────────────────────────────────────────────────────────────────

/// Run counters kept per agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentMetrics {
    pub successful_runs: u64,
    pub failed_runs: u64,
    /// Successful runs that reported a generation time.
    pub timed_runs: u64,
    pub average_generation_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_successful_run: Option<DateTime<Utc>>,
}

impl AgentMetrics {
    /// Fold one terminal run into the counters.
    pub fn record(&mut self, success: bool, generation_ms: Option<u64>, at: DateTime<Utc>) {
        if !success {
            self.failed_runs += 1;
            return;
        }
        self.successful_runs += 1;
        self.last_successful_run = Some(at);
        if let Some(ms) = generation_ms {
            let mut mean = RunningMean::from_parts(self.average_generation_ms, self.timed_runs);
            mean.push(ms as f64);
            self.average_generation_ms = mean.mean();
            self.timed_runs = mean.count();
        }
    }
}

/// An automated content generator whose runs are scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: AgentMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_task_type() -> String {
    DEFAULT_TASK_TYPE.to_string()
}

impl Agent {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active: true,
            task_type: default_task_type(),
            schedule: None,
            next_run_at: None,
            last_run_at: None,
            metrics: AgentMetrics::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the agent takes part in scheduled runs at all.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.active && self.schedule.as_ref().is_some_and(|s| s.enabled)
    }
}

// ── Tasks ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::message(format!("unknown task status: {other}"))),
        }
    }
}

/// What the executor reported for a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    /// Identifier of whatever the run produced (article, post, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_id: Option<String>,
    /// Executor-specific extras, opaque to the scheduler.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

impl TaskResult {
    #[must_use]
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_generation_time_ms(mut self, ms: u64) -> Self {
        self.generation_time_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_output_id(mut self, id: impl Into<String>) -> Self {
        self.output_id = Some(id.into());
        self
    }
}

/// One scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// Optimistic-concurrency token, bumped by every stored transition.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Input for creating a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Dashboard counters over a set of tasks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub pending_count: usize,
    pub running_count: usize,
    pub completed_today: usize,
    pub failed_today: usize,
    pub task_type: String,
    pub total_completed_of_type: usize,
    pub average_generation_ms: f64,
    pub timed_samples: u64,
}
