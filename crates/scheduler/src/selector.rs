//! Read-only selection of due agents and ready tasks.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    Result,
    store::{AgentStore, TaskQuery, TaskStore},
    types::{Agent, Task, TaskStatus},
};

/// Whether `agent` should fire at `now`.
#[must_use]
pub fn is_due(agent: &Agent, now: DateTime<Utc>) -> bool {
    agent.is_scheduled() && agent.next_run_at.is_some_and(|next| next <= now)
}

/// Scheduled agents that have never had a next run computed.
#[must_use]
pub fn needs_arming(agent: &Agent) -> bool {
    agent.is_scheduled() && agent.next_run_at.is_none()
}

/// Finds work that is ready now. Performs no writes.
pub struct DueWorkSelector {
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
}

impl DueWorkSelector {
    pub fn new(tasks: Arc<dyn TaskStore>, agents: Arc<dyn AgentStore>) -> Self {
        Self { tasks, agents }
    }

    /// Active agents with an enabled schedule whose `next_run_at <= now`.
    pub async fn find_due_agents(&self, now: DateTime<Utc>) -> Result<Vec<Agent>> {
        let agents = self.agents.list_agents().await?;
        Ok(agents.into_iter().filter(|a| is_due(a, now)).collect())
    }

    /// Pending tasks with `scheduled_for <= now`, oldest first.
    pub async fn find_pending_tasks(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Task>> {
        let mut query = TaskQuery::new()
            .status(TaskStatus::Pending)
            .scheduled_until(now);
        query.limit = limit;
        self.tasks.query(&query).await
    }
}
