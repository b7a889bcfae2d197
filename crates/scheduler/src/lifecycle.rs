//! Persisted task transitions.
//!
//! Every transition reads the current record, applies the in-memory rule from
//! [`crate::task`], bumps `version` and writes back conditionally on the
//! version it read. A lost write is reported, never retried here.

use std::sync::Arc;

use tracing::{debug, info, warn};

#[cfg(feature = "metrics")]
use autopilot_metrics::{counter, scheduler as sched_metrics};

use crate::{
    Error, Result,
    clock::Clock,
    store::{TaskStore, WriteOutcome},
    task::{Applied, RetryDecision},
    types::{NewTask, Task, TaskResult, TaskStatus},
};

/// Result of trying to take ownership of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller now owns the task, which is `running`.
    Claimed(Task),
    /// Someone else got there first, or the task is no longer pending.
    AlreadyClaimed,
}

impl ClaimOutcome {
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Applies state-machine transitions to stored tasks.
pub struct TaskLifecycle {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    default_max_retries: u32,
}

impl TaskLifecycle {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, default_max_retries: u32) -> Self {
        Self {
            store,
            clock,
            default_max_retries,
        }
    }

    /// Insert a fresh `pending` task with a generated id.
    pub async fn create(&self, input: NewTask) -> Result<Task> {
        let task = Task::new(
            uuid::Uuid::new_v4().to_string(),
            input,
            self.clock.now(),
            self.default_max_retries,
        );
        task.validate()?;
        self.store.create(&task).await?;
        info!(
            task_id = %task.id,
            agent_id = %task.agent_id,
            scheduled_for = %task.scheduled_for,
            "task created"
        );
        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Result<Task> {
        self.store
            .get(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    /// `pending → running` as a conditional write.
    ///
    /// Losing the race, or finding the task already past `pending`, yields
    /// [`ClaimOutcome::AlreadyClaimed`] rather than an error.
    pub async fn claim(&self, task_id: &str) -> Result<ClaimOutcome> {
        let mut task = self.get(task_id).await?;
        if task.status != TaskStatus::Pending {
            debug!(task_id, status = %task.status, "claim skipped, task not pending");
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        let expected = task.version;
        task.start(self.clock.now())?;
        task.version += 1;

        match self.store.update(&task, expected).await? {
            WriteOutcome::Written => {
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::TASKS_CLAIMED_TOTAL).increment(1);
                info!(task_id, agent_id = %task.agent_id, "task claimed");
                Ok(ClaimOutcome::Claimed(task))
            },
            WriteOutcome::Conflict => {
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::CLAIM_CONFLICTS_TOTAL).increment(1);
                debug!(task_id, "claim lost to a concurrent writer");
                Ok(ClaimOutcome::AlreadyClaimed)
            },
            WriteOutcome::NotFound => Err(Error::task_not_found(task_id)),
        }
    }

    /// `running → completed`. Re-completing a completed task changes nothing.
    pub async fn complete(&self, task_id: &str, result: TaskResult) -> Result<(Task, Applied)> {
        let mut task = self.get(task_id).await?;
        let expected = task.version;
        match task.complete(self.clock.now(), result)? {
            Applied::Unchanged => Ok((task, Applied::Unchanged)),
            Applied::Changed => {
                let task = self.persist(task, expected).await?;
                info!(task_id, agent_id = %task.agent_id, "task completed");
                Ok((task, Applied::Changed))
            },
        }
    }

    /// `running → failed`. Re-failing a failed task changes nothing.
    pub async fn fail(
        &self,
        task_id: &str,
        error: impl Into<String>,
        result: Option<TaskResult>,
    ) -> Result<(Task, Applied)> {
        let mut task = self.get(task_id).await?;
        let expected = task.version;
        match task.fail(self.clock.now(), error, result)? {
            Applied::Unchanged => Ok((task, Applied::Unchanged)),
            Applied::Changed => {
                let task = self.persist(task, expected).await?;
                warn!(
                    task_id,
                    agent_id = %task.agent_id,
                    error = task.result.as_ref().and_then(|r| r.error.as_deref()).unwrap_or(""),
                    "task failed"
                );
                Ok((task, Applied::Changed))
            },
        }
    }

    /// `pending → cancelled`. Every other state is an [`Error::InvalidTransition`].
    pub async fn cancel(&self, task_id: &str) -> Result<Task> {
        let mut task = self.get(task_id).await?;
        let expected = task.version;
        task.cancel(self.clock.now())?;
        let task = self.persist(task, expected).await?;
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::TASKS_CANCELLED_TOTAL).increment(1);
        info!(task_id, "task cancelled");
        Ok(task)
    }

    /// Count a failed attempt and either requeue the task or fail it for good.
    pub async fn increment_retry(&self, task_id: &str) -> Result<(Task, RetryDecision)> {
        let mut task = self.get(task_id).await?;
        let expected = task.version;
        let decision = task.increment_retry(self.clock.now())?;
        let task = self.persist(task, expected).await?;

        match decision {
            RetryDecision::Retry => {
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::RETRIES_TOTAL).increment(1);
                info!(
                    task_id,
                    retry_count = task.retry_count,
                    max_retries = task.max_retries,
                    "task requeued for retry"
                );
            },
            RetryDecision::Exhausted => {
                #[cfg(feature = "metrics")]
                counter!(sched_metrics::RETRIES_EXHAUSTED_TOTAL).increment(1);
                warn!(task_id, max_retries = task.max_retries, "retries exhausted");
            },
        }
        Ok((task, decision))
    }

    async fn persist(&self, mut task: Task, expected: u64) -> Result<Task> {
        task.version = expected + 1;
        match self.store.update(&task, expected).await? {
            WriteOutcome::Written => Ok(task),
            WriteOutcome::Conflict => Err(Error::conflict(&task.id)),
            WriteOutcome::NotFound => Err(Error::task_not_found(&task.id)),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{clock::ManualClock, store_memory::InMemoryTaskStore},
        chrono::{DateTime, Duration, TimeZone, Utc},
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn setup() -> (TaskLifecycle, Arc<InMemoryTaskStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryTaskStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let lifecycle = TaskLifecycle::new(store.clone(), clock.clone(), 3);
        (lifecycle, store, clock)
    }

    fn new_task() -> NewTask {
        NewTask {
            agent_id: "a1".into(),
            agent_name: "Ava".into(),
            task_type: "generate-article".into(),
            scheduled_for: t0(),
            max_retries: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_defaults() {
        let (lifecycle, store, _) = setup();
        let task = lifecycle.create(new_task()).await.unwrap();
        assert!(!task.id.is_empty());
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_retries, 3);
        assert_eq!(store.get(&task.id).await.unwrap(), Some(task));
    }

    #[tokio::test]
    async fn test_claim_then_complete() {
        let (lifecycle, _, clock) = setup();
        let task = lifecycle.create(new_task()).await.unwrap();

        clock.advance(Duration::minutes(1));
        let ClaimOutcome::Claimed(running) = lifecycle.claim(&task.id).await.unwrap() else {
            panic!("expected claim to succeed");
        };
        assert_eq!(running.status, TaskStatus::Running);
        assert_eq!(running.started_at, Some(t0() + Duration::minutes(1)));
        assert_eq!(running.version, 1);

        assert_eq!(
            lifecycle.claim(&task.id).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );

        clock.advance(Duration::minutes(2));
        let (done, applied) = lifecycle
            .complete(&task.id, TaskResult::success().with_generation_time_ms(90_000))
            .await
            .unwrap();
        assert_eq!(applied, Applied::Changed);
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.completed_at, Some(t0() + Duration::minutes(3)));
        assert_eq!(done.version, 2);

        // Re-applying is a no-op that writes nothing.
        let (again, applied) = lifecycle
            .complete(&task.id, TaskResult::success())
            .await
            .unwrap();
        assert_eq!(applied, Applied::Unchanged);
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn test_claim_loses_to_concurrent_writer() {
        let (lifecycle, store, _) = setup();
        let task = lifecycle.create(new_task()).await.unwrap();

        // Another worker claims the same version first.
        let mut other = task.clone();
        other.start(t0()).unwrap();
        other.version = 1;
        assert_eq!(store.update(&other, 0).await.unwrap(), WriteOutcome::Written);

        assert_eq!(
            lifecycle.claim(&task.id).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[tokio::test]
    async fn test_cancel_running_is_invalid() {
        let (lifecycle, store, _) = setup();
        let task = lifecycle.create(new_task()).await.unwrap();
        lifecycle.claim(&task.id).await.unwrap();

        let err = lifecycle.cancel(&task.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition {
            from: TaskStatus::Running,
            ..
        }));
        assert_eq!(
            store.get(&task.id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn test_complete_failed_is_invalid() {
        let (lifecycle, _, _) = setup();
        let task = lifecycle.create(new_task()).await.unwrap();
        lifecycle.claim(&task.id).await.unwrap();
        lifecycle.fail(&task.id, "boom", None).await.unwrap();
        assert!(matches!(
            lifecycle.complete(&task.id, TaskResult::success()).await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_retry_until_exhausted() {
        let (lifecycle, _, _) = setup();
        let task = lifecycle.create(new_task()).await.unwrap();

        for expected in [RetryDecision::Retry, RetryDecision::Retry] {
            lifecycle.claim(&task.id).await.unwrap();
            let (t, decision) = lifecycle.increment_retry(&task.id).await.unwrap();
            assert_eq!(decision, expected);
            assert_eq!(t.status, TaskStatus::Pending);
        }
        lifecycle.claim(&task.id).await.unwrap();
        let (t, decision) = lifecycle.increment_retry(&task.id).await.unwrap();
        assert_eq!(decision, RetryDecision::Exhausted);
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 3);

        assert!(matches!(
            lifecycle.increment_retry(&task.id).await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    /// Store whose conditional writes always lose.
    struct AlwaysConflict(InMemoryTaskStore);

    #[async_trait::async_trait]
    impl TaskStore for AlwaysConflict {
        async fn create(&self, task: &Task) -> Result<String> {
            self.0.create(task).await
        }

        async fn get(&self, id: &str) -> Result<Option<Task>> {
            self.0.get(id).await
        }

        async fn query(&self, query: &crate::store::TaskQuery) -> Result<Vec<Task>> {
            self.0.query(query).await
        }

        async fn update(&self, _task: &Task, _expected_version: u64) -> Result<WriteOutcome> {
            Ok(WriteOutcome::Conflict)
        }

        async fn delete(&self, id: &str) -> Result<bool> {
            self.0.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_lost_write_on_transition_is_conflict() {
        let store = Arc::new(AlwaysConflict(InMemoryTaskStore::new()));
        let lifecycle = TaskLifecycle::new(store, Arc::new(ManualClock::new(t0())), 3);
        let task = lifecycle.create(new_task()).await.unwrap();

        assert!(matches!(
            lifecycle.cancel(&task.id).await,
            Err(Error::Conflict { .. })
        ));
        assert_eq!(
            lifecycle.claim(&task.id).await.unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[tokio::test]
    async fn test_missing_task() {
        let (lifecycle, _, _) = setup();
        assert!(matches!(
            lifecycle.claim("nope").await,
            Err(Error::TaskNotFound { .. })
        ));
        assert!(matches!(
            lifecycle.cancel("nope").await,
            Err(Error::TaskNotFound { .. })
        ));
    }
}
