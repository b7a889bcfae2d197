use {
    anyhow::{Context, Result},
    autopilot_scheduler::{
        ClaimOutcome, Outcome,
        store::TaskQuery,
        types::{Task, TaskResult, TaskStatus},
    },
    clap::{Subcommand, ValueEnum},
};

use crate::context::{AppContext, print_json, read_json_arg};

/// Exit code when `tasks claim` loses to another worker.
pub const ALREADY_CLAIMED_EXIT: i32 = 2;

#[derive(Subcommand)]
pub enum TaskAction {
    /// List tasks, newest first.
    List {
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only pending tasks whose scheduled time has arrived, oldest first.
        #[arg(long, conflicts_with = "status")]
        ready: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show one task as JSON.
    Show { id: String },
    /// Move a pending task to running. Exits with status 2 if already taken.
    Claim { id: String },
    /// Record the outcome of a running task.
    Report {
        id: String,
        #[arg(value_enum)]
        outcome: ReportKind,
        /// Error message for a failed run.
        #[arg(long)]
        error: Option<String>,
        /// Count a failure against the task's retries instead of failing it.
        #[arg(long)]
        retryable: bool,
        #[arg(long)]
        generation_ms: Option<u64>,
        #[arg(long)]
        tokens: Option<u64>,
        #[arg(long)]
        output_id: Option<String>,
        /// Extra JSON stored with the result (`-` for stdin, `@file`).
        #[arg(long)]
        payload: Option<String>,
    },
    /// Cancel a pending task.
    Cancel { id: String },
    /// Delete finished tasks older than the retention period.
    Cleanup {
        /// Overrides `scheduler.retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    Succeeded,
    Failed,
}

pub async fn handle_tasks(ctx: &AppContext, action: TaskAction) -> Result<()> {
    let scheduler = &ctx.scheduler;
    match action {
        TaskAction::List {
            agent,
            status,
            ready,
            limit,
            json,
        } => {
            let tasks = if ready {
                let limit = limit.unwrap_or(ctx.config.scheduler.claim_batch_size);
                scheduler.pending_tasks(scheduler.now(), Some(limit)).await?
            } else {
                let mut query = TaskQuery::new().newest_first().limit(limit.unwrap_or(20));
                if let Some(agent) = agent {
                    query = query.agent(agent);
                }
                if let Some(status) = status {
                    query = query.status(status);
                }
                scheduler.list_tasks(&query).await?
            };
            if json {
                return print_json(&tasks);
            }
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in &tasks {
                println!("{}", task_line(ctx, task));
            }
            Ok(())
        },
        TaskAction::Show { id } => print_json(&scheduler.get_task(&id).await?),
        TaskAction::Claim { id } => match scheduler.claim_and_mark_running(&id).await? {
            ClaimOutcome::Claimed(task) => print_json(&task),
            ClaimOutcome::AlreadyClaimed => {
                eprintln!("task {id} was already claimed");
                std::process::exit(ALREADY_CLAIMED_EXIT);
            },
        },
        TaskAction::Report {
            id,
            outcome,
            error,
            retryable,
            generation_ms,
            tokens,
            output_id,
            payload,
        } => {
            let mut result = match outcome {
                ReportKind::Succeeded => TaskResult::success(),
                ReportKind::Failed => {
                    TaskResult::failure(error.unwrap_or_else(|| "failed without a message".into()))
                },
            };
            result.generation_time_ms = generation_ms;
            result.tokens_used = tokens;
            result.output_id = output_id;
            if let Some(raw) = payload {
                result.payload = serde_json::from_str(&read_json_arg(&raw)?)
                    .context("--payload is not valid JSON")?;
            }
            let outcome = match outcome {
                ReportKind::Succeeded => Outcome::Succeeded(result),
                ReportKind::Failed => Outcome::Failed { result, retryable },
            };
            print_json(&scheduler.report_outcome(&id, outcome).await?)
        },
        TaskAction::Cancel { id } => print_json(&scheduler.cancel_task(&id).await?),
        TaskAction::Cleanup { days } => {
            let days = days.unwrap_or(ctx.config.scheduler.retention_days);
            let removed = scheduler.cleanup_old_tasks(days).await?;
            println!("Removed {removed} task(s) finished more than {days} day(s) ago.");
            Ok(())
        },
    }
}

fn task_line(ctx: &AppContext, task: &Task) -> String {
    let tz = ctx.display_tz();
    let scheduled = task.scheduled_for.with_timezone(&tz).format("%Y-%m-%d %H:%M");
    let retries = if task.retry_count > 0 {
        format!(" retry {}/{}", task.retry_count, task.max_retries)
    } else {
        String::new()
    };
    let error = task
        .result
        .as_ref()
        .and_then(|r| r.error.as_deref())
        .map(|e| format!("  ({e})"))
        .unwrap_or_default();
    format!(
        "{}  {:<9}  {}  {} [{}]{retries}{error}",
        task.id,
        task.status.as_str(),
        scheduled,
        task.agent_name,
        task.task_type
    )
}
