//! In-memory stores for tests and single-process dry runs.

use std::{collections::HashMap, sync::Mutex};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
};

use crate::{
    Error, Result,
    store::{AgentStore, TaskQuery, TaskStore, WriteOutcome},
    types::{Agent, Task},
};

/// Task store backed by a `HashMap`. No persistence.
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &Task) -> Result<String> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if tasks.contains_key(&task.id) {
            return Err(Error::message(format!("task already exists: {}", task.id)));
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(task.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.get(id).cloned())
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<Task> = tasks.values().filter(|t| query.matches(t)).cloned().collect();
        found.sort_by(|a, b| {
            a.scheduled_for
                .cmp(&b.scheduled_for)
                .then_with(|| a.id.cmp(&b.id))
        });
        if query.newest_first {
            found.reverse();
        }
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn update(&self, task: &Task, expected_version: u64) -> Result<WriteOutcome> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stored) = tasks.get_mut(&task.id) else {
            return Ok(WriteOutcome::NotFound);
        };
        if stored.version != expected_version {
            return Ok(WriteOutcome::Conflict);
        }
        *stored = task.clone();
        Ok(WriteOutcome::Written)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks.remove(id).is_some())
    }
}

/// Agent store backed by a `HashMap`. No persistence.
pub struct InMemoryAgentStore {
    agents: Mutex<HashMap<String, Agent>>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAgentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Agent> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(agents.get(id).cloned())
    }

    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let mut record = agent.clone();
        if let Some(existing) = agents.get(&agent.id) {
            record.next_run_at = existing.next_run_at;
        }
        agents.insert(agent.id.clone(), record);
        Ok(())
    }

    async fn set_next_run_at(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
        expected: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome> {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let Some(agent) = agents.get_mut(id) else {
            return Ok(WriteOutcome::NotFound);
        };
        if agent.next_run_at != expected {
            return Ok(WriteOutcome::Conflict);
        }
        agent.next_run_at = next_run_at;
        Ok(WriteOutcome::Written)
    }
}
