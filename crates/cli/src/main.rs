mod agent_commands;
mod config_commands;
mod context;
mod run_commands;
mod schedule_commands;
mod task_commands;

use std::path::PathBuf;

use {
    anyhow::Context as _,
    autopilot_scheduler::parse::parse_instant,
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use crate::context::{AppContext, GlobalOpts};

#[derive(Parser)]
#[command(name = "autopilot", about = "Autopilot: recurring agent task scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./autopilot.toml and the user config dir).
    #[arg(long, global = true, env = "AUTOPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Database URL (overrides `storage.database_url`).
    #[arg(long, global = true, env = "AUTOPILOT_DATABASE_URL")]
    database_url: Option<String>,

    /// Act as if the current time were this RFC 3339 instant.
    #[arg(long, global = true)]
    now: Option<String>,

    /// Print collected metrics in Prometheus format on exit.
    #[arg(long, global = true, default_value_t = false)]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show upcoming runs for a schedule given as JSON (`-` for stdin, `@file`).
    NextRun {
        spec: String,
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Run one due check and create tasks for agents that are due.
    RunDue {
        /// Treat every scheduled agent as due.
        #[arg(long)]
        force: bool,
    },
    /// Run due checks on an interval until Ctrl+C.
    Tick {
        /// Seconds between checks (overrides `scheduler.tick_interval_secs`).
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Task management.
    Tasks {
        #[command(subcommand)]
        action: task_commands::TaskAction,
    },
    /// Agent and schedule management.
    Agents {
        #[command(subcommand)]
        action: agent_commands::AgentAction,
    },
    /// Dashboard counters.
    Stats,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays machine-readable.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn init_metrics(cli: &Cli) -> anyhow::Result<autopilot_metrics::MetricsHandle> {
    // A broken config file is reported by `config check` and by store-backed
    // commands, so metrics fall back to defaults here.
    let config = context::load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "config unreadable, metrics use defaults");
        autopilot_config::AutopilotConfig::default()
    });
    let handle = autopilot_metrics::init_metrics(autopilot_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config.metrics.labels.into_iter().collect(),
    })?;
    Ok(handle)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "autopilot starting");
    let metrics = init_metrics(&cli)?;

    let opts = GlobalOpts {
        config: cli.config.clone(),
        database_url: cli.database_url.clone(),
        now: cli.now.clone(),
    };

    let result = match cli.command {
        Commands::NextRun { spec, count } => {
            let config = context::load_config(cli.config.as_deref())?;
            let now = match &cli.now {
                Some(raw) => {
                    parse_instant(raw).with_context(|| format!("invalid --now {raw:?}"))?
                },
                None => chrono::Utc::now(),
            };
            schedule_commands::next_run(&spec, count, &config.scheduler.default_timezone, now)
        },
        Commands::Config { action } => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
        Commands::RunDue { force } => {
            let ctx = AppContext::open(&opts).await?;
            run_commands::run_due(&ctx, force).await
        },
        Commands::Tick { interval_secs } => {
            let ctx = AppContext::open(&opts).await?;
            run_commands::tick(&ctx, interval_secs).await
        },
        Commands::Tasks { action } => {
            let ctx = AppContext::open(&opts).await?;
            task_commands::handle_tasks(&ctx, action).await
        },
        Commands::Agents { action } => {
            let ctx = AppContext::open(&opts).await?;
            agent_commands::handle_agents(&ctx, action).await
        },
        Commands::Stats => {
            let ctx = AppContext::open(&opts).await?;
            run_commands::stats(&ctx).await
        },
    };

    if cli.print_metrics {
        eprint!("{}", metrics.render());
    }
    result
}
