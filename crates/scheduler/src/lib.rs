//! Scheduling and run tracking for content-generation agents.
//!
//! Agents carry a recurrence ([`types::ScheduleSpec`]); a due check turns each
//! due agent into a `pending` [`types::Task`], executors claim tasks and report
//! how they ended. All state lives behind the [`store::TaskStore`] and
//! [`store::AgentStore`] ports; SQLite and in-memory adapters are provided.

pub mod clock;
pub mod error;
pub mod format;
pub mod lifecycle;
pub mod parse;
pub mod schedule;
pub mod selector;
pub mod service;
pub mod stats;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod task;
pub mod types;

pub use {
    error::{Error, RepositoryError, Result},
    lifecycle::{ClaimOutcome, TaskLifecycle},
    schedule::compute_next_run,
    service::{DueCheckReport, Outcome, Scheduler, SchedulerSettings},
};

/// Run database migrations for the scheduler tables.
///
/// Creates the `agents` and `tasks` tables. Call at startup before
/// [`store_sqlite::SqliteStore::with_pool`]; [`store_sqlite::SqliteStore::new`]
/// runs them itself.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
