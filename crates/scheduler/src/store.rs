//! Persistence ports for tasks and agent schedules.

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Result,
    types::{Agent, ScheduleSpec, Task, TaskStatus},
};

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The stored record no longer matched the expected value.
    Conflict,
    NotFound,
}

/// Filter over stored tasks. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub agent_id: Option<String>,
    pub status: Option<TaskStatus>,
    /// `scheduled_for <= scheduled_until`
    pub scheduled_until: Option<DateTime<Utc>>,
    /// `completed_at < completed_before`
    pub completed_before: Option<DateTime<Utc>>,
    /// Order by `scheduled_for` descending instead of ascending.
    pub newest_first: bool,
    pub limit: Option<usize>,
}

impl TaskQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    #[must_use]
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn scheduled_until(mut self, until: DateTime<Utc>) -> Self {
        self.scheduled_until = Some(until);
        self
    }

    #[must_use]
    pub fn completed_before(mut self, before: DateTime<Utc>) -> Self {
        self.completed_before = Some(before);
        self
    }

    #[must_use]
    pub fn newest_first(mut self) -> Self {
        self.newest_first = true;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `task` passes every predicate (ordering and limit aside).
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.agent_id.as_ref().is_none_or(|a| *a == task.agent_id)
            && self.status.is_none_or(|s| s == task.status)
            && self
                .scheduled_until
                .is_none_or(|until| task.scheduled_for <= until)
            && self
                .completed_before
                .is_none_or(|before| task.completed_at.is_some_and(|c| c < before))
    }
}

/// Durable store for task records.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task. Its `id` is assigned by the caller.
    async fn create(&self, task: &Task) -> Result<String>;
    async fn get(&self, id: &str) -> Result<Option<Task>>;
    async fn query(&self, query: &TaskQuery) -> Result<Vec<Task>>;
    /// Replace the stored task only if its version still equals `expected_version`.
    async fn update(&self, task: &Task, expected_version: u64) -> Result<WriteOutcome>;
    /// Remove a task. Only retention cleanup calls this.
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// Durable store for agents and their schedules.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn list_agents(&self) -> Result<Vec<Agent>>;
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;
    /// Insert or replace an agent record.
    ///
    /// On an existing record the stored `next_run_at` is kept; it only moves
    /// through [`AgentStore::set_next_run_at`].
    async fn save_agent(&self, agent: &Agent) -> Result<()>;

    async fn get_schedule(&self, id: &str) -> Result<Option<ScheduleSpec>> {
        Ok(self.get_agent(id).await?.and_then(|a| a.schedule))
    }

    /// Set `next_run_at` only if it still equals `expected`.
    async fn set_next_run_at(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
        expected: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome>;
}
