#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::sync::Arc;

use {
    autopilot_scheduler::{
        ClaimOutcome, Outcome, Scheduler, SchedulerSettings,
        clock::{Clock, ManualClock},
        store::{AgentStore, TaskQuery, TaskStore},
        store_memory::{InMemoryAgentStore, InMemoryTaskStore},
        store_sqlite::SqliteStore,
        types::{Agent, Recurrence, ScheduleSpec, TaskResult, TaskStatus, TimeOfDay},
    },
    chrono::{DateTime, Duration, TimeZone, Utc},
};

fn t0() -> DateTime<Utc> {
    // Wednesday 2025-01-15, 14:00 UTC (09:00 in New York).
    Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap()
}

fn weekly_mon_wed_fri() -> ScheduleSpec {
    ScheduleSpec::new(
        Recurrence::Weekly {
            time: Some(TimeOfDay::new(9, 0).unwrap()),
            days_of_week: Some([1, 3, 5].into_iter().collect()),
        },
        "America/New_York",
    )
}

fn scheduler(
    tasks: Arc<dyn TaskStore>,
    agents: Arc<dyn AgentStore>,
    clock: Arc<ManualClock>,
) -> Scheduler {
    Scheduler::new(tasks, agents, clock, SchedulerSettings::default())
}

async fn seed_due_agent(agents: &dyn AgentStore, id: &str) {
    let mut agent = Agent::new(id, format!("Writer {id}"), t0() - Duration::days(7));
    agent.schedule = Some(weekly_mon_wed_fri());
    agents.save_agent(&agent).await.unwrap();
    agents.set_next_run_at(id, Some(t0()), None).await.unwrap();
}

#[tokio::test]
async fn two_schedulers_sharing_stores_create_one_task() {
    let tasks = Arc::new(InMemoryTaskStore::new());
    let agents = Arc::new(InMemoryAgentStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    seed_due_agent(agents.as_ref(), "a1").await;

    // Separate instances share no in-process locks, only the stores.
    let first = scheduler(tasks.clone(), agents.clone(), clock.clone());
    let second = scheduler(tasks.clone(), agents.clone(), clock.clone());

    let (a, b) = tokio::join!(first.run_due_check(t0()), second.run_due_check(t0()));
    let created = a.unwrap().created.len() + b.unwrap().created.len();

    assert_eq!(created, 1);
    assert_eq!(tasks.query(&TaskQuery::new()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_claims_have_one_winner() {
    let tasks = Arc::new(InMemoryTaskStore::new());
    let agents = Arc::new(InMemoryAgentStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    seed_due_agent(agents.as_ref(), "a1").await;

    let first = scheduler(tasks.clone(), agents.clone(), clock.clone());
    let second = scheduler(tasks.clone(), agents.clone(), clock.clone());
    let task_id = first.run_due_check(t0()).await.unwrap().created[0].clone();

    let (a, b) = tokio::join!(
        first.claim_and_mark_running(&task_id),
        second.claim_and_mark_running(&task_id)
    );
    let winners = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(ClaimOutcome::is_claimed)
        .count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn sqlite_end_to_end_weekly_agent() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("autopilot.db").display()
    );
    let store = Arc::new(SqliteStore::new(&url).await.unwrap());
    let clock = Arc::new(ManualClock::new(t0()));
    let svc = scheduler(store.clone(), store.clone(), clock.clone());

    let mut agent = Agent::new("writer", "Weekly Writer", t0());
    agent.schedule = Some(weekly_mon_wed_fri());
    let agent = svc.upsert_agent(agent).await.unwrap();
    // Wednesday 09:00 local has just arrived, so Friday is next.
    let friday = Utc.with_ymd_and_hms(2025, 1, 17, 14, 0, 0).unwrap();
    assert_eq!(agent.next_run_at, Some(friday));

    assert!(svc.run_due_check(t0()).await.unwrap().created.is_empty());

    clock.set(friday + Duration::minutes(1));
    let report = svc.run_due_check(clock.now()).await.unwrap();
    assert_eq!(report.created.len(), 1);
    let task_id = &report.created[0];

    let ready = svc.pending_tasks(clock.now(), None).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, *task_id);

    let ClaimOutcome::Claimed(running) = svc.claim_and_mark_running(task_id).await.unwrap() else {
        panic!("expected to claim the new task");
    };
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(
        svc.claim_and_mark_running(task_id).await.unwrap(),
        ClaimOutcome::AlreadyClaimed
    );

    clock.advance(Duration::minutes(3));
    let done = svc
        .report_outcome(
            task_id,
            Outcome::Succeeded(
                TaskResult::success()
                    .with_generation_time_ms(180_000)
                    .with_output_id("article-42"),
            ),
        )
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let agent = svc.get_agent("writer").await.unwrap();
    assert_eq!(agent.metrics.successful_runs, 1);
    // Next Monday 09:00 New York.
    assert_eq!(
        agent.next_run_at,
        Some(Utc.with_ymd_and_hms(2025, 1, 20, 14, 0, 0).unwrap())
    );

    let stats = svc.stats(clock.now()).await.unwrap();
    assert_eq!(stats.completed_today, 1);
    assert_eq!(stats.pending_count, 0);
    assert_eq!(stats.average_generation_ms, 180_000.0);

    let history = svc.agent_history("writer", 5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].result.as_ref().unwrap().output_id.as_deref(),
        Some("article-42")
    );
}

#[tokio::test]
async fn sqlite_two_schedulers_create_one_task() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("shared.db").display());
    let store = Arc::new(SqliteStore::new(&url).await.unwrap());
    let clock = Arc::new(ManualClock::new(t0()));
    seed_due_agent(store.as_ref(), "a1").await;

    let first = scheduler(store.clone(), store.clone(), clock.clone());
    let second = scheduler(store.clone(), store.clone(), clock.clone());
    let (a, b) = tokio::join!(first.run_due_check(t0()), second.run_due_check(t0()));

    assert_eq!(a.unwrap().created.len() + b.unwrap().created.len(), 1);
    assert_eq!(store.query(&TaskQuery::new()).await.unwrap().len(), 1);
}
