//! Trigger surface: due checks, claims, outcome reports and agent schedule
//! management.

use std::{collections::HashMap, sync::Arc};

use {
    chrono::{DateTime, Duration, Utc},
    chrono_tz::Tz,
    serde::Serialize,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use autopilot_metrics::{counter, gauge, histogram, labels, scheduler as sched_metrics};

use crate::{
    Error, Result,
    clock::Clock,
    lifecycle::{ClaimOutcome, TaskLifecycle},
    schedule::compute_next_run,
    selector::{DueWorkSelector, is_due, needs_arming},
    stats::compute_stats,
    store::{AgentStore, TaskQuery, TaskStore, WriteOutcome},
    task::{Applied, RetryDecision},
    types::{
        Agent, DEFAULT_MAX_RETRIES, DEFAULT_TASK_TYPE, NewTask, ScheduleSpec, Task, TaskResult,
        TaskStats, TaskStatus,
    },
};

/// Tunables the scheduler is constructed with.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub default_max_retries: u32,
    /// Task type counted by [`Scheduler::stats`].
    pub default_task_type: String,
    /// Reference zone for "today" in stats.
    pub stats_timezone: Tz,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_task_type: DEFAULT_TASK_TYPE.to_string(),
            stats_timezone: Tz::UTC,
        }
    }
}

/// Why a due check left an agent alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "reason", content = "detail")]
pub enum SkipReason {
    /// No longer due, disabled or removed once the lock was held.
    NotDue,
    /// Another checker advanced `next_run_at` first.
    Conflict,
    /// The stored schedule cannot be evaluated.
    InvalidSchedule(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedAgent {
    pub agent_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// What one due check did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DueCheckReport {
    /// Ids of the tasks created.
    pub created: Vec<String>,
    /// Agents whose first `next_run_at` was computed.
    pub armed: Vec<String>,
    pub skipped: Vec<SkippedAgent>,
}

/// What the executor reports once a claimed task has run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(TaskResult),
    /// A `retryable` failure is counted against the task's retries; otherwise
    /// the task fails immediately.
    Failed { result: TaskResult, retryable: bool },
}

/// Counts from [`Scheduler::pause_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseReport {
    pub paused: usize,
    pub already_paused: usize,
}

enum Fired {
    Created(String),
    Armed,
    Skipped(SkipReason),
}

/// The scheduler. Holds no task state of its own; everything lives in the
/// stores it was built with.
pub struct Scheduler {
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    clock: Arc<dyn Clock>,
    lifecycle: TaskLifecycle,
    selector: DueWorkSelector,
    settings: SchedulerSettings,
    agent_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        agents: Arc<dyn AgentStore>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            lifecycle: TaskLifecycle::new(
                Arc::clone(&tasks),
                Arc::clone(&clock),
                settings.default_max_retries,
            ),
            selector: DueWorkSelector::new(Arc::clone(&tasks), Arc::clone(&agents)),
            tasks,
            agents,
            clock,
            settings,
            agent_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    #[must_use]
    pub fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Trigger surface ─────────────────────────────────────────────────

    /// Create a pending task for every agent due at `now`.
    ///
    /// Safe to call concurrently and redundantly: each agent's window yields
    /// at most one task.
    pub async fn run_due_check(&self, now: DateTime<Utc>) -> Result<DueCheckReport> {
        self.check_agents(now, false).await
    }

    /// Like [`Scheduler::run_due_check`], but every scheduled agent counts as
    /// due regardless of `next_run_at`.
    pub async fn force_run_all(&self, now: DateTime<Utc>) -> Result<DueCheckReport> {
        self.check_agents(now, true).await
    }

    /// Take ownership of a pending task.
    pub async fn claim_and_mark_running(&self, task_id: &str) -> Result<ClaimOutcome> {
        self.lifecycle.claim(task_id).await
    }

    /// Record how a task ended and fold it into the agent's history.
    ///
    /// Usually the task was claimed first, but a retryable failure is also
    /// accepted while the task is still pending. Fails with the schedule
    /// error if the agent's next run can no longer be computed; the task's
    /// own transition is kept in that case.
    pub async fn report_outcome(&self, task_id: &str, outcome: Outcome) -> Result<Task> {
        let (task, applied) = match outcome {
            Outcome::Succeeded(result) => self.lifecycle.complete(task_id, result).await?,
            Outcome::Failed {
                result,
                retryable: true,
            } => {
                self.record_attempt_error(task_id, &result).await?;
                let (task, decision) = self.lifecycle.increment_retry(task_id).await?;
                let applied = match decision {
                    RetryDecision::Retry => Applied::Unchanged,
                    RetryDecision::Exhausted => Applied::Changed,
                };
                (task, applied)
            },
            Outcome::Failed {
                result,
                retryable: false,
            } => {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string());
                self.lifecycle.fail(task_id, error, Some(result)).await?
            },
        };

        if applied == Applied::Changed && task.status.is_terminal() {
            #[cfg(feature = "metrics")]
            {
                counter!(sched_metrics::OUTCOMES_TOTAL, labels::STATUS => task.status.as_str())
                    .increment(1);
                if let Some(ms) = task.result.as_ref().and_then(|r| r.generation_time_ms) {
                    histogram!(sched_metrics::GENERATION_DURATION_SECONDS)
                        .record(ms as f64 / 1000.0);
                }
            }
            self.after_run(&task).await?;
        }
        Ok(task)
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<Task> {
        self.lifecycle.cancel(task_id).await
    }

    /// Pending tasks ready for an executor, oldest first.
    pub async fn pending_tasks(
        &self,
        now: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<Task>> {
        let tasks = self.selector.find_pending_tasks(now, limit).await?;
        #[cfg(feature = "metrics")]
        gauge!(sched_metrics::TASKS_READY).set(tasks.len() as f64);
        Ok(tasks)
    }

    /// Dashboard counters over every stored task.
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<TaskStats> {
        let tasks = self.tasks.query(&TaskQuery::new()).await?;
        Ok(compute_stats(
            &tasks,
            now,
            self.settings.stats_timezone,
            &self.settings.default_task_type,
        ))
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.lifecycle.get(task_id).await
    }

    pub async fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        self.tasks.query(query).await
    }

    /// Most recent tasks for one agent, newest first.
    pub async fn agent_history(&self, agent_id: &str, limit: usize) -> Result<Vec<Task>> {
        self.tasks
            .query(&TaskQuery::new().agent(agent_id).newest_first().limit(limit))
            .await
    }

    /// Delete terminal tasks that finished more than `days` days ago.
    pub async fn cleanup_old_tasks(&self, days: u32) -> Result<usize> {
        let cutoff = self.clock.now() - Duration::days(i64::from(days));
        let stale = self
            .tasks
            .query(&TaskQuery::new().completed_before(cutoff))
            .await?;

        let mut removed = 0;
        for task in stale.iter().filter(|t| t.status.is_terminal()) {
            if self.tasks.delete(&task.id).await? {
                removed += 1;
            }
        }

        #[cfg(feature = "metrics")]
        counter!(sched_metrics::TASKS_CLEANED_TOTAL).increment(removed as u64);
        info!(removed, days, %cutoff, "old tasks cleaned up");
        Ok(removed)
    }

    // ── Agents ──────────────────────────────────────────────────────────

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        self.agents.list_agents().await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::agent_not_found(agent_id))
    }

    /// Insert or replace an agent, keeping its run history. The next run is
    /// recomputed only for a new agent or a changed schedule.
    pub async fn upsert_agent(&self, mut agent: Agent) -> Result<Agent> {
        if let Some(spec) = &agent.schedule {
            spec.validate()?;
        }
        let lock = self.agent_lock(&agent.id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let previous = self.agents.get_agent(&agent.id).await?;
        if let Some(previous) = &previous {
            agent.metrics = previous.metrics.clone();
            agent.last_run_at = previous.last_run_at;
            agent.created_at = previous.created_at;
        }
        agent.next_run_at = previous.as_ref().and_then(|p| p.next_run_at);
        agent.updated_at = now;
        self.agents.save_agent(&agent).await?;

        let schedule_changed = previous.as_ref().is_none_or(|p| {
            p.schedule != agent.schedule || p.is_scheduled() != agent.is_scheduled()
        });
        if schedule_changed {
            self.reschedule(agent, now).await
        } else {
            Ok(agent)
        }
    }

    /// Replace an agent's schedule (or remove it with `None`).
    pub async fn set_schedule(&self, agent_id: &str, spec: Option<ScheduleSpec>) -> Result<Agent> {
        if let Some(spec) = &spec {
            spec.validate()?;
        }
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut agent = self.get_agent(agent_id).await?;
        agent.schedule = spec;
        agent.updated_at = now;
        self.agents.save_agent(&agent).await?;
        info!(agent_id, "schedule updated");
        self.reschedule(agent, now).await
    }

    /// Flip an agent's schedule between enabled and paused.
    pub async fn toggle_schedule(&self, agent_id: &str) -> Result<Agent> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let mut agent = self.get_agent(agent_id).await?;
        let Some(spec) = agent.schedule.as_mut() else {
            return Err(Error::schedule_config(format!(
                "agent {agent_id} has no schedule"
            )));
        };
        spec.enabled = !spec.enabled;
        spec.validate()?;
        let enabled = spec.enabled;
        agent.updated_at = now;
        self.agents.save_agent(&agent).await?;
        info!(agent_id, enabled, "schedule toggled");
        self.reschedule(agent, now).await
    }

    /// Disable every enabled schedule.
    pub async fn pause_all(&self) -> Result<PauseReport> {
        let mut report = PauseReport::default();
        for listed in self.agents.list_agents().await? {
            let lock = self.agent_lock(&listed.id);
            let _guard = lock.lock().await;

            let now = self.clock.now();
            let Some(mut agent) = self.agents.get_agent(&listed.id).await? else {
                continue;
            };
            match agent.schedule.as_mut() {
                Some(spec) if spec.enabled => {
                    spec.enabled = false;
                    agent.updated_at = now;
                    self.agents.save_agent(&agent).await?;
                    self.reschedule(agent, now).await?;
                    report.paused += 1;
                },
                _ => report.already_paused += 1,
            }
        }
        info!(
            paused = report.paused,
            already_paused = report.already_paused,
            "all schedules paused"
        );
        Ok(report)
    }

    /// Queue a run for one agent now, outside its schedule. `next_run_at` is
    /// left alone.
    pub async fn run_agent_now(&self, agent_id: &str) -> Result<Task> {
        let lock = self.agent_lock(agent_id);
        let _guard = lock.lock().await;

        let agent = self.get_agent(agent_id).await?;
        let task = self.create_task_for(&agent, self.clock.now()).await?;
        info!(agent_id, task_id = %task.id, "manual run queued");
        Ok(task)
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn agent_lock(&self, agent_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.agent_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(agent_id.to_string()).or_default())
    }

    async fn check_agents(&self, now: DateTime<Utc>, force: bool) -> Result<DueCheckReport> {
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::DUE_CHECKS_TOTAL).increment(1);

        let candidates: Vec<Agent> = self
            .agents
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| {
                if force {
                    a.is_scheduled()
                } else {
                    is_due(a, now) || needs_arming(a)
                }
            })
            .collect();

        #[cfg(feature = "metrics")]
        gauge!(sched_metrics::AGENTS_DUE).set(candidates.len() as f64);

        let mut report = DueCheckReport::default();
        for candidate in candidates {
            let lock = self.agent_lock(&candidate.id);
            let _guard = lock.lock().await;

            // Re-read under the lock; an earlier holder may have advanced it.
            let fired = match self.agents.get_agent(&candidate.id).await? {
                Some(agent) => self.fire(&agent, now, force).await,
                None => Ok(Fired::Skipped(SkipReason::NotDue)),
            };

            match fired {
                Ok(Fired::Created(task_id)) => report.created.push(task_id),
                Ok(Fired::Armed) => report.armed.push(candidate.id),
                Ok(Fired::Skipped(reason)) => report.skipped.push(SkippedAgent {
                    agent_id: candidate.id,
                    reason,
                }),
                Err(e @ (Error::ScheduleConfig { .. } | Error::UnknownTimezone { .. })) => {
                    warn!(agent_id = %candidate.id, error = %e, "skipping agent with invalid schedule");
                    report.skipped.push(SkippedAgent {
                        agent_id: candidate.id,
                        reason: SkipReason::InvalidSchedule(e.to_string()),
                    });
                },
                Err(e) => return Err(e),
            }
        }

        if !report.created.is_empty() || !report.armed.is_empty() {
            info!(
                created = report.created.len(),
                armed = report.armed.len(),
                skipped = report.skipped.len(),
                force,
                "due check finished"
            );
        } else {
            debug!(skipped = report.skipped.len(), force, "due check found nothing");
        }
        Ok(report)
    }

    /// Fire one agent. Caller holds the agent's lock.
    async fn fire(&self, agent: &Agent, now: DateTime<Utc>, force: bool) -> Result<Fired> {
        let Some(spec) = agent.schedule.as_ref().filter(|_| agent.is_scheduled()) else {
            return Ok(Fired::Skipped(SkipReason::NotDue));
        };

        if !force && needs_arming(agent) {
            let next = compute_next_run(spec, now)?;
            return Ok(match self.agents.set_next_run_at(&agent.id, Some(next), None).await? {
                WriteOutcome::Written => {
                    debug!(agent_id = %agent.id, %next, "schedule armed");
                    Fired::Armed
                },
                WriteOutcome::Conflict => Fired::Skipped(SkipReason::Conflict),
                WriteOutcome::NotFound => Fired::Skipped(SkipReason::NotDue),
            });
        }

        if !force && !is_due(agent, now) {
            return Ok(Fired::Skipped(SkipReason::NotDue));
        }

        // Advance from this firing's instant, then create. A writer that loses
        // the swap creates nothing.
        let next = compute_next_run(spec, now)?;
        match self
            .agents
            .set_next_run_at(&agent.id, Some(next), agent.next_run_at)
            .await?
        {
            WriteOutcome::Written => {},
            WriteOutcome::Conflict => {
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::NEXT_RUN_CONFLICTS_TOTAL).increment(1);
                debug!(agent_id = %agent.id, "next run already advanced elsewhere");
                return Ok(Fired::Skipped(SkipReason::Conflict));
            },
            WriteOutcome::NotFound => return Ok(Fired::Skipped(SkipReason::NotDue)),
        }

        let task = match self.create_task_for(agent, now).await {
            Ok(task) => task,
            Err(e) => {
                self.restore_next_run(agent, next).await;
                return Err(e);
            },
        };
        info!(
            agent_id = %agent.id,
            task_id = %task.id,
            %next,
            "scheduled run queued"
        );
        Ok(Fired::Created(task.id))
    }

    /// Undo a `next_run_at` advance whose task could not be created, so the
    /// window fires again on the next check.
    async fn restore_next_run(&self, agent: &Agent, advanced_to: DateTime<Utc>) {
        match self
            .agents
            .set_next_run_at(&agent.id, agent.next_run_at, Some(advanced_to))
            .await
        {
            Ok(WriteOutcome::Written) => {
                debug!(agent_id = %agent.id, "next run restored after failed task insert")
            },
            Ok(_) => warn!(agent_id = %agent.id, "next run changed elsewhere, not restored"),
            Err(e) => warn!(agent_id = %agent.id, error = %e, "failed to restore next run"),
        }
    }

    async fn create_task_for(&self, agent: &Agent, scheduled_for: DateTime<Utc>) -> Result<Task> {
        let task = self
            .lifecycle
            .create(NewTask {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                task_type: agent.task_type.clone(),
                scheduled_for,
                max_retries: None,
            })
            .await?;
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::TASKS_CREATED_TOTAL).increment(1);
        Ok(task)
    }

    /// Keep the executor's error on a task that is about to be retried.
    async fn record_attempt_error(&self, task_id: &str, result: &TaskResult) -> Result<()> {
        let mut task = self.lifecycle.get(task_id).await?;
        if task.status.is_terminal() {
            return Err(Error::invalid_transition(task_id, task.status, "retry"));
        }
        let expected = task.version;
        task.result = Some(TaskResult {
            success: false,
            ..result.clone()
        });
        task.updated_at = self.clock.now();
        task.version += 1;
        match self.tasks.update(&task, expected).await? {
            WriteOutcome::Written => Ok(()),
            WriteOutcome::Conflict => Err(Error::conflict(task_id)),
            WriteOutcome::NotFound => Err(Error::task_not_found(task_id)),
        }
    }

    /// Update the agent's run counters and, if the stored next run has
    /// already passed, compute a fresh one.
    async fn after_run(&self, task: &Task) -> Result<()> {
        let lock = self.agent_lock(&task.agent_id);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        let Some(mut agent) = self.agents.get_agent(&task.agent_id).await? else {
            warn!(agent_id = %task.agent_id, task_id = %task.id, "finished task has no agent");
            return Ok(());
        };

        let success = task.status == TaskStatus::Completed;
        let generation_ms = task.result.as_ref().and_then(|r| r.generation_time_ms);
        agent
            .metrics
            .record(success, generation_ms, task.completed_at.unwrap_or(now));
        agent.last_run_at = Some(now);
        agent.updated_at = now;
        self.agents.save_agent(&agent).await?;

        if agent.is_scheduled() && agent.next_run_at.is_none_or(|next| next <= now) {
            self.advance_next_run(&agent, now).await?;
        }
        Ok(())
    }

    /// Bring `next_run_at` in line with the agent's current schedule. Caller
    /// holds the agent's lock and has already saved `agent`.
    async fn reschedule(&self, mut agent: Agent, now: DateTime<Utc>) -> Result<Agent> {
        let next = match &agent.schedule {
            Some(spec) if agent.is_scheduled() => Some(compute_next_run(spec, now)?),
            _ => None,
        };
        match self
            .agents
            .set_next_run_at(&agent.id, next, agent.next_run_at)
            .await?
        {
            WriteOutcome::Written => {},
            WriteOutcome::Conflict => return Err(Error::agent_conflict(&agent.id)),
            WriteOutcome::NotFound => return Err(Error::agent_not_found(&agent.id)),
        }
        agent.next_run_at = next;
        Ok(agent)
    }

    async fn advance_next_run(&self, agent: &Agent, now: DateTime<Utc>) -> Result<()> {
        let Some(spec) = agent.schedule.as_ref() else {
            return Ok(());
        };
        let next = compute_next_run(spec, now)?;
        match self
            .agents
            .set_next_run_at(&agent.id, Some(next), agent.next_run_at)
            .await?
        {
            WriteOutcome::Written => debug!(agent_id = %agent.id, %next, "next run advanced"),
            WriteOutcome::Conflict | WriteOutcome::NotFound => {
                debug!(agent_id = %agent.id, "next run changed elsewhere, leaving it")
            },
        }
        Ok(())
    }
}
