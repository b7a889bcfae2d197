use {
    anyhow::{Context, Result, bail},
    autopilot_scheduler::{format::format_next_run, types::Agent},
    clap::Subcommand,
    serde::Deserialize,
};

use crate::{
    context::{AppContext, parse_tz, print_json, read_json_arg},
    schedule_commands::parse_schedule,
};

#[derive(Subcommand)]
pub enum AgentAction {
    /// List agents with their schedule and next run.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show one agent as JSON.
    Show { id: String },
    /// Create or replace an agent from JSON (`-` for stdin, `@file`).
    Upsert { agent: String },
    /// Set an agent's schedule from JSON, or remove it with `--clear`.
    Schedule {
        id: String,
        #[arg(required_unless_present = "clear")]
        spec: Option<String>,
        #[arg(long, conflicts_with = "spec")]
        clear: bool,
    },
    /// Pause or resume an agent's schedule.
    Toggle { id: String },
    /// Pause every enabled schedule.
    PauseAll,
    /// Queue a run for an agent immediately.
    Run { id: String },
    /// Recent tasks for an agent, newest first.
    History {
        id: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Agent fields accepted by `agents upsert`. Run history is kept by the
/// scheduler and cannot be set here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AgentInput {
    id: String,
    name: String,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    task_type: Option<String>,
    #[serde(default)]
    schedule: Option<serde_json::Value>,
}

fn agent_from_input(ctx: &AppContext, raw: &str) -> Result<Agent> {
    let input: AgentInput = serde_json::from_str(raw).context("invalid agent JSON")?;
    if input.id.trim().is_empty() {
        bail!("agent id must not be empty");
    }
    let mut agent = Agent::new(input.id, input.name, ctx.scheduler.now());
    if let Some(active) = input.active {
        agent.active = active;
    }
    agent.task_type = input
        .task_type
        .unwrap_or_else(|| ctx.config.scheduler.default_task_type.clone());
    agent.schedule = input
        .schedule
        .map(|value| parse_schedule(&value.to_string(), &ctx.config.scheduler.default_timezone))
        .transpose()?;
    Ok(agent)
}

pub async fn handle_agents(ctx: &AppContext, action: AgentAction) -> Result<()> {
    let scheduler = &ctx.scheduler;
    match action {
        AgentAction::List { json } => {
            let agents = scheduler.list_agents().await?;
            if json {
                return print_json(&agents);
            }
            if agents.is_empty() {
                println!("No agents.");
            }
            for agent in &agents {
                println!("{}", agent_line(ctx, agent)?);
            }
            Ok(())
        },
        AgentAction::Show { id } => print_json(&scheduler.get_agent(&id).await?),
        AgentAction::Upsert { agent } => {
            let agent = agent_from_input(ctx, &read_json_arg(&agent)?)?;
            print_json(&scheduler.upsert_agent(agent).await?)
        },
        AgentAction::Schedule { id, spec, clear } => {
            let spec = match (spec, clear) {
                (_, true) => None,
                (Some(raw), false) => Some(parse_schedule(
                    &read_json_arg(&raw)?,
                    &ctx.config.scheduler.default_timezone,
                )?),
                (None, false) => bail!("a schedule or --clear is required"),
            };
            print_json(&scheduler.set_schedule(&id, spec).await?)
        },
        AgentAction::Toggle { id } => print_json(&scheduler.toggle_schedule(&id).await?),
        AgentAction::PauseAll => print_json(&scheduler.pause_all().await?),
        AgentAction::Run { id } => print_json(&scheduler.run_agent_now(&id).await?),
        AgentAction::History { id, limit } => {
            print_json(&scheduler.agent_history(&id, limit).await?)
        },
    }
}

fn agent_line(ctx: &AppContext, agent: &Agent) -> Result<String> {
    let (schedule, tz) = match &agent.schedule {
        Some(spec) => {
            let state = if spec.enabled { "" } else { " (paused)" };
            (
                format!("{} {}{state}", spec.recurrence.as_str(), spec.timezone),
                parse_tz(&spec.timezone)?,
            )
        },
        None => ("unscheduled".to_string(), ctx.display_tz()),
    };
    let active = if agent.active { "" } else { "  inactive" };
    Ok(format!(
        "{}  {}  [{}]  {}  next: {}  runs: {} ok / {} failed{active}",
        agent.id,
        agent.name,
        agent.task_type,
        schedule,
        format_next_run(agent.next_run_at, ctx.scheduler.now(), tz),
        agent.metrics.successful_runs,
        agent.metrics.failed_runs,
    ))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        autopilot_config::AutopilotConfig,
        autopilot_scheduler::{clock::ManualClock, types::Recurrence},
        chrono::{TimeZone, Utc},
        std::sync::Arc,
    };

    fn ctx() -> AppContext {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 14, 0, 0).unwrap();
        AppContext::in_memory(AutopilotConfig::default(), Arc::new(ManualClock::new(now)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_fills_defaults_and_schedules() {
        let ctx = ctx();
        handle_agents(&ctx, AgentAction::Upsert {
            agent: r#"{"id":"w1","name":"Writer","schedule":{"frequency":"daily","time":"10:00"}}"#
                .into(),
        })
        .await
        .unwrap();

        let agent = ctx.scheduler.get_agent("w1").await.unwrap();
        assert_eq!(agent.task_type, "generate-article");
        let spec = agent.schedule.as_ref().unwrap();
        assert_eq!(spec.timezone, "America/New_York");
        assert!(matches!(spec.recurrence, Recurrence::Daily { .. }));
        // 10:00 New York is 15:00 UTC, an hour after the pinned clock.
        assert_eq!(
            agent.next_run_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 15, 15, 0, 0).unwrap())
        );
        assert!(agent_line(&ctx, &agent).unwrap().contains("In 1 hour"));
    }

    #[test]
    fn test_upsert_rejects_metrics_field() {
        let ctx = ctx();
        let err = agent_from_input(&ctx, r#"{"id":"w1","name":"W","metrics":{}}"#).unwrap_err();
        assert!(err.to_string().contains("invalid agent JSON"));
    }

    #[tokio::test]
    async fn test_clear_schedule_and_pause_all() {
        let ctx = ctx();
        handle_agents(&ctx, AgentAction::Upsert {
            agent: r#"{"id":"w1","name":"Writer","schedule":{"frequency":"hourly"}}"#.into(),
        })
        .await
        .unwrap();
        handle_agents(&ctx, AgentAction::Upsert {
            agent: r#"{"id":"w2","name":"Other","schedule":{"frequency":"hourly"}}"#.into(),
        })
        .await
        .unwrap();

        handle_agents(&ctx, AgentAction::Schedule {
            id: "w1".into(),
            spec: None,
            clear: true,
        })
        .await
        .unwrap();
        let cleared = ctx.scheduler.get_agent("w1").await.unwrap();
        assert!(cleared.schedule.is_none());
        assert!(cleared.next_run_at.is_none());

        let report = ctx.scheduler.pause_all().await.unwrap();
        assert_eq!(report.paused, 1);
        assert_eq!(report.already_paused, 1);
    }

    #[tokio::test]
    async fn test_run_now_creates_pending_task() {
        let ctx = ctx();
        handle_agents(&ctx, AgentAction::Upsert {
            agent: r#"{"id":"w1","name":"Writer"}"#.into(),
        })
        .await
        .unwrap();
        handle_agents(&ctx, AgentAction::Run { id: "w1".into() })
            .await
            .unwrap();

        let history = ctx.scheduler.agent_history("w1", 5).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
