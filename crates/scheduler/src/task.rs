//! Task state machine rules, applied to a record in memory.
//!
//! ```text
//! pending ──start──▶ running ──complete──▶ completed
//!    │                  │  └──────fail───▶ failed
//!    │                  └──retry──▶ pending (or failed once exhausted)
//!    └──cancel──▶ cancelled
//! ```
//!
//! Persisting a transition is the lifecycle manager's job; everything here is
//! pure so the rules can be checked without a store.

use chrono::{DateTime, Utc};

use crate::{
    Error, Result,
    types::{NewTask, Task, TaskResult, TaskStatus},
};

/// Whether applying a transition changed the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// The task was already in the requested terminal state.
    Unchanged,
}

/// Outcome of bumping a task's retry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending`, eligible to run again.
    Retry,
    /// Retries used up; the task is now `failed`.
    Exhausted,
}

impl RetryDecision {
    #[must_use]
    pub fn may_retry(self) -> bool {
        matches!(self, Self::Retry)
    }
}

impl Task {
    /// Build a fresh `pending` task.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        input: NewTask,
        now: DateTime<Utc>,
        default_max_retries: u32,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: input.agent_id,
            agent_name: input.agent_name,
            task_type: input.task_type,
            status: TaskStatus::Pending,
            scheduled_for: input.scheduled_for,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: input.max_retries.unwrap_or(default_max_retries),
            result: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the record-level invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() || self.agent_id.is_empty() {
            return Err(Error::message("task id and agent id must be set"));
        }
        if self.retry_count > self.max_retries {
            return Err(Error::message(format!(
                "task {}: retry count {} exceeds max retries {}",
                self.id, self.retry_count, self.max_retries
            )));
        }
        if self.status == TaskStatus::Pending
            && (self.started_at.is_some() || self.completed_at.is_some())
        {
            return Err(Error::message(format!(
                "task {}: pending task carries start or completion time",
                self.id
            )));
        }
        if self.status == TaskStatus::Running && self.started_at.is_none() {
            return Err(Error::message(format!(
                "task {}: running task has no start time",
                self.id
            )));
        }
        if self.status.is_terminal() != self.completed_at.is_some() {
            return Err(Error::message(format!(
                "task {}: completion time does not match status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Pending and due at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.scheduled_for <= now
    }

    /// `pending → running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(TaskStatus::Pending, "start")?;
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// `running → completed`, storing the executor's result.
    pub fn complete(&mut self, now: DateTime<Utc>, result: TaskResult) -> Result<Applied> {
        if self.status == TaskStatus::Completed {
            return Ok(Applied::Unchanged);
        }
        self.expect_status(TaskStatus::Running, "complete")?;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.result = Some(TaskResult {
            success: true,
            ..result
        });
        self.updated_at = now;
        Ok(Applied::Changed)
    }

    /// `running → failed` with an error message.
    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        error: impl Into<String>,
        result: Option<TaskResult>,
    ) -> Result<Applied> {
        if self.status == TaskStatus::Failed {
            return Ok(Applied::Unchanged);
        }
        self.expect_status(TaskStatus::Running, "fail")?;
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        self.result = Some(TaskResult {
            success: false,
            error: Some(error.into()),
            ..result.unwrap_or_default()
        });
        self.updated_at = now;
        Ok(Applied::Changed)
    }

    /// `pending → cancelled`. Any other starting state is rejected.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(TaskStatus::Pending, "cancel")?;
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Count a failed attempt.
    ///
    /// Below the ceiling the task returns to `pending`; at the ceiling it
    /// becomes `failed` with a terminal message. Terminal tasks are rejected.
    pub fn increment_retry(&mut self, now: DateTime<Utc>) -> Result<RetryDecision> {
        if self.status.is_terminal() {
            return Err(Error::invalid_transition(&self.id, self.status, "retry"));
        }

        let attempts = self.retry_count.saturating_add(1);
        self.updated_at = now;

        if attempts < self.max_retries {
            self.retry_count = attempts;
            self.status = TaskStatus::Pending;
            self.started_at = None;
            return Ok(RetryDecision::Retry);
        }

        self.retry_count = attempts.min(self.max_retries);
        self.status = TaskStatus::Failed;
        self.completed_at = Some(now);
        let previous = self.result.take().unwrap_or_default();
        self.result = Some(TaskResult {
            success: false,
            error: Some(format!("Max retries ({}) exceeded", self.max_retries)),
            ..previous
        });
        Ok(RetryDecision::Exhausted)
    }

    fn expect_status(&self, expected: TaskStatus, action: &'static str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(Error::invalid_transition(&self.id, self.status, action))
        }
    }
}
