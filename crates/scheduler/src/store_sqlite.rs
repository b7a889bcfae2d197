//! SQLite-backed task and agent stores using sqlx.

use {
    async_trait::async_trait,
    chrono::{DateTime, SecondsFormat, Utc},
    sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Error, Result,
    error::Context,
    store::{AgentStore, TaskQuery, TaskStore, WriteOutcome},
    types::{Agent, Task},
};

/// SQLite-backed persistence for agents and tasks.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with its own connection pool and run migrations.
    ///
    /// For a pool shared with other tables, use [`SqliteStore::with_pool`]
    /// after calling [`crate::run_migrations`].
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn task_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn agent_exists(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// Fixed-width UTC form, so column values order the same as instants.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let at = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("corrupt timestamp in agents table: {raw:?}"))?;
    Ok(at.with_timezone(&Utc))
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Task> {
    let data: String = row.get("data");
    Ok(serde_json::from_str(&data)?)
}

fn agent_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Agent> {
    let data: String = row.get("data");
    let mut agent: Agent = serde_json::from_str(&data)?;
    let next_run_at: Option<String> = row.get("next_run_at");
    agent.next_run_at = next_run_at.as_deref().map(parse_timestamp).transpose()?;
    Ok(agent)
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create(&self, task: &Task) -> Result<String> {
        let data = serde_json::to_string(task)?;
        sqlx::query(
            "INSERT INTO tasks (id, agent_id, status, scheduled_for, completed_at, version, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.id)
        .bind(&task.agent_id)
        .bind(task.status.as_str())
        .bind(timestamp(task.scheduled_for))
        .bind(task.completed_at.map(timestamp))
        .bind(task.version as i64)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(task.id.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT data FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    async fn query(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT data FROM tasks WHERE 1 = 1");
        if let Some(agent_id) = &query.agent_id {
            qb.push(" AND agent_id = ").push_bind(agent_id.clone());
        }
        if let Some(status) = query.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(until) = query.scheduled_until {
            qb.push(" AND scheduled_for <= ").push_bind(timestamp(until));
        }
        if let Some(before) = query.completed_before {
            qb.push(" AND completed_at IS NOT NULL AND completed_at < ")
                .push_bind(timestamp(before));
        }
        qb.push(if query.newest_first {
            " ORDER BY scheduled_for DESC, id DESC"
        } else {
            " ORDER BY scheduled_for ASC, id ASC"
        });
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn update(&self, task: &Task, expected_version: u64) -> Result<WriteOutcome> {
        let data = serde_json::to_string(task)?;
        let result = sqlx::query(
            "UPDATE tasks
             SET agent_id = ?, status = ?, scheduled_for = ?, completed_at = ?, version = ?, data = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&task.agent_id)
        .bind(task.status.as_str())
        .bind(timestamp(task.scheduled_for))
        .bind(task.completed_at.map(timestamp))
        .bind(task.version as i64)
        .bind(&data)
        .bind(&task.id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(WriteOutcome::Written)
        } else if self.task_exists(&task.id).await? {
            Ok(WriteOutcome::Conflict)
        } else {
            Ok(WriteOutcome::NotFound)
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AgentStore for SqliteStore {
    async fn list_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query("SELECT next_run_at, data FROM agents")
            .fetch_all(&self.pool)
            .await?;
        let mut agents = rows
            .iter()
            .map(agent_from_row)
            .collect::<Result<Vec<_>>>()?;
        agents.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(agents)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query("SELECT next_run_at, data FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(agent_from_row).transpose()
    }

    async fn save_agent(&self, agent: &Agent) -> Result<()> {
        if agent.id.is_empty() {
            return Err(Error::message("agent id must be set"));
        }
        let data = serde_json::to_string(agent)?;
        sqlx::query(
            "INSERT INTO agents (id, next_run_at, data) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(&agent.id)
        .bind(agent.next_run_at.map(timestamp))
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_next_run_at(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
        expected: Option<DateTime<Utc>>,
    ) -> Result<WriteOutcome> {
        let result =
            sqlx::query("UPDATE agents SET next_run_at = ? WHERE id = ? AND next_run_at IS ?")
                .bind(next_run_at.map(timestamp))
                .bind(id)
                .bind(expected.map(timestamp))
                .execute(&self.pool)
                .await?;

        if result.rows_affected() > 0 {
            Ok(WriteOutcome::Written)
        } else if self.agent_exists(id).await? {
            Ok(WriteOutcome::Conflict)
        } else {
            Ok(WriteOutcome::NotFound)
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{NewTask, Recurrence, ScheduleSpec, TaskResult, TaskStatus},
        chrono::{Duration, TimeZone},
    };

    async fn make_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn make_task(id: &str, agent: &str, offset_min: i64) -> Task {
        Task::new(
            id,
            NewTask {
                agent_id: agent.into(),
                agent_name: format!("agent-{agent}"),
                task_type: "generate-article".into(),
                scheduled_for: t0() + Duration::minutes(offset_min),
                max_retries: None,
            },
            t0(),
            3,
        )
    }

    #[tokio::test]
    async fn test_sqlite_task_roundtrip() {
        let store = make_store().await;
        let mut task = make_task("1", "a", 0);
        task.result = Some(TaskResult::success().with_generation_time_ms(1500));
        store.create(&task).await.unwrap();

        assert_eq!(store.get("1").await.unwrap(), Some(task));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_create_duplicate_fails() {
        let store = make_store().await;
        store.create(&make_task("1", "a", 0)).await.unwrap();
        let err = store.create(&make_task("1", "a", 0)).await.unwrap_err();
        assert!(err.is_repository());
    }

    #[tokio::test]
    async fn test_sqlite_query_filters_and_order() {
        let store = make_store().await;
        store.create(&make_task("1", "a", 10)).await.unwrap();
        store.create(&make_task("2", "a", -10)).await.unwrap();
        store.create(&make_task("3", "b", -5)).await.unwrap();

        let mut running = make_task("4", "a", -20);
        running.start(t0()).unwrap();
        store.create(&running).await.unwrap();

        let due = store
            .query(
                &TaskQuery::new()
                    .status(TaskStatus::Pending)
                    .scheduled_until(t0()),
            )
            .await
            .unwrap();
        let ids: Vec<_> = due.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);

        let history = store
            .query(&TaskQuery::new().agent("a").newest_first().limit(2))
            .await
            .unwrap();
        let ids: Vec<_> = history.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_sqlite_completed_before() {
        let store = make_store().await;
        let mut old = make_task("old", "a", 0);
        old.cancel(t0() - Duration::days(40)).unwrap();
        store.create(&old).await.unwrap();
        let mut recent = make_task("recent", "a", 0);
        recent.cancel(t0()).unwrap();
        store.create(&recent).await.unwrap();
        store.create(&make_task("open", "a", 0)).await.unwrap();

        let stale = store
            .query(&TaskQuery::new().completed_before(t0() - Duration::days(30)))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "old");
    }

    #[tokio::test]
    async fn test_sqlite_update_checks_version() {
        let store = make_store().await;
        let task = make_task("1", "a", 0);
        store.create(&task).await.unwrap();

        let mut claimed = task.clone();
        claimed.start(t0()).unwrap();
        claimed.version = 1;
        assert_eq!(store.update(&claimed, 0).await.unwrap(), WriteOutcome::Written);

        let mut stale = task.clone();
        stale.cancel(t0()).unwrap();
        stale.version = 1;
        assert_eq!(store.update(&stale, 0).await.unwrap(), WriteOutcome::Conflict);

        let stored = store.get("1").await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.version, 1);

        assert_eq!(
            store.update(&make_task("ghost", "a", 0), 0).await.unwrap(),
            WriteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_sqlite_delete() {
        let store = make_store().await;
        store.create(&make_task("1", "a", 0)).await.unwrap();
        assert!(store.delete("1").await.unwrap());
        assert!(!store.delete("1").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_agent_upsert_and_schedule() {
        let store = make_store().await;
        let mut agent = Agent::new("a1", "Ava", t0());
        agent.schedule = Some(ScheduleSpec::new(Recurrence::Hourly, "UTC"));
        store.save_agent(&agent).await.unwrap();

        store
            .set_next_run_at("a1", Some(t0()), None)
            .await
            .unwrap();

        agent.name = "Ava II".into();
        store.save_agent(&agent).await.unwrap();

        let agents = store.list_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "Ava II");
        assert_eq!(agents[0].next_run_at, Some(t0()));
        assert_eq!(
            store.get_schedule("a1").await.unwrap().unwrap().recurrence,
            Recurrence::Hourly
        );
    }

    #[tokio::test]
    async fn test_sqlite_set_next_run_at_compare_and_swap() {
        let store = make_store().await;
        store.save_agent(&Agent::new("a1", "Ava", t0())).await.unwrap();

        let first = t0() + Duration::milliseconds(1_234);
        assert_eq!(
            store.set_next_run_at("a1", Some(first), None).await.unwrap(),
            WriteOutcome::Written
        );
        // A second writer still expecting "unset" loses.
        assert_eq!(
            store
                .set_next_run_at("a1", Some(t0() + Duration::hours(1)), None)
                .await
                .unwrap(),
            WriteOutcome::Conflict
        );

        let loaded = store.get_agent("a1").await.unwrap().unwrap();
        assert_eq!(loaded.next_run_at, Some(first));

        let second = first + Duration::hours(1);
        assert_eq!(
            store
                .set_next_run_at("a1", Some(second), loaded.next_run_at)
                .await
                .unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            store.set_next_run_at("ghost", None, None).await.unwrap(),
            WriteOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_sqlite_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("autopilot.db").display());
        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.create(&make_task("1", "a", 0)).await.unwrap();
        }
        let reopened = SqliteStore::new(&url).await.unwrap();
        assert!(reopened.get("1").await.unwrap().is_some());
    }
}
