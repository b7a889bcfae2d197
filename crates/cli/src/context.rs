use std::{
    io::Read,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result, bail},
    autopilot_config::{AutopilotConfig, Severity, StorageBackend},
    autopilot_scheduler::{
        Scheduler, SchedulerSettings,
        clock::{Clock, ManualClock, SystemClock},
        parse::parse_instant,
        store::{AgentStore, TaskStore},
        store_memory::{InMemoryAgentStore, InMemoryTaskStore},
        store_sqlite::SqliteStore,
    },
    chrono_tz::Tz,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use autopilot_metrics::{config as config_metrics, counter, labels};

/// Global options every store-backed command shares.
#[derive(Debug, Clone, Default)]
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub database_url: Option<String>,
    pub now: Option<String>,
}

/// Load the config from `--config` or the standard locations.
pub fn load_config(path: Option<&Path>) -> Result<AutopilotConfig> {
    match path {
        Some(path) => autopilot_config::load_config(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(autopilot_config::discover_and_load()),
    }
}

/// Run config validation, log every diagnostic, and refuse to start on errors.
pub fn check_config(path: Option<&Path>) -> Result<()> {
    let result = autopilot_config::validate(path);
    for d in &result.diagnostics {
        #[cfg(feature = "metrics")]
        counter!(config_metrics::DIAGNOSTICS_TOTAL, labels::SEVERITY => d.severity.to_string())
            .increment(1);
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => debug!(path = %d.path, "{}", d.message),
        }
    }
    if result.has_errors() {
        bail!(
            "configuration has {} error(s); run `autopilot config check` for details",
            result.count(Severity::Error)
        );
    }
    Ok(())
}

/// Everything a store-backed command needs.
pub struct AppContext {
    pub config: AutopilotConfig,
    pub scheduler: Scheduler,
    /// Set when `--now` pinned the clock.
    pub pinned_now: bool,
}

impl AppContext {
    pub async fn open(opts: &GlobalOpts) -> Result<Self> {
        check_config(opts.config.as_deref())?;
        let config = load_config(opts.config.as_deref())?;

        let clock: Arc<dyn Clock> = match &opts.now {
            Some(raw) => Arc::new(ManualClock::new(
                parse_instant(raw).with_context(|| format!("invalid --now {raw:?}"))?,
            )),
            None => Arc::new(SystemClock),
        };

        let (tasks, agents) = open_stores(&config, opts.database_url.as_deref()).await?;
        let settings = settings_from(&config)?;
        Ok(Self {
            scheduler: Scheduler::new(tasks, agents, clock, settings),
            config,
            pinned_now: opts.now.is_some(),
        })
    }

    /// Build a context over in-memory stores, bypassing config discovery.
    #[cfg(test)]
    pub fn in_memory(config: AutopilotConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let settings = settings_from(&config)?;
        Ok(Self {
            scheduler: Scheduler::new(
                Arc::new(InMemoryTaskStore::new()),
                Arc::new(InMemoryAgentStore::new()),
                clock,
                settings,
            ),
            config,
            pinned_now: true,
        })
    }

    /// Zone used to render instants for humans.
    pub fn display_tz(&self) -> Tz {
        self.scheduler.settings().stats_timezone
    }
}

pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("unknown timezone {name:?}: {e}"))
}

fn settings_from(config: &AutopilotConfig) -> Result<SchedulerSettings> {
    Ok(SchedulerSettings {
        default_max_retries: config.scheduler.default_max_retries,
        default_task_type: config.scheduler.default_task_type.clone(),
        stats_timezone: parse_tz(&config.scheduler.stats_timezone)?,
    })
}

async fn open_stores(
    config: &AutopilotConfig,
    url_override: Option<&str>,
) -> Result<(Arc<dyn TaskStore>, Arc<dyn AgentStore>)> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("using in-memory storage");
            Ok((
                Arc::new(InMemoryTaskStore::new()),
                Arc::new(InMemoryAgentStore::new()),
            ))
        },
        StorageBackend::Sqlite => {
            let url = match url_override {
                Some(url) => url.to_string(),
                None => {
                    if config.storage.database_url.is_none() {
                        let dir = autopilot_config::data_dir();
                        std::fs::create_dir_all(&dir).with_context(|| {
                            format!("creating data directory {}", dir.display())
                        })?;
                    }
                    config.storage.resolved_database_url()
                },
            };
            debug!(url = %url, "opening sqlite store");
            let store = Arc::new(
                SqliteStore::new(&url)
                    .await
                    .with_context(|| format!("opening database {url}"))?,
            );
            Ok((store.clone(), store))
        },
    }
}

/// Read a JSON argument: `-` means stdin, `@path` reads a file, anything else
/// is the JSON itself.
pub fn read_json_arg(arg: &str) -> Result<String> {
    if arg == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading JSON from stdin")?;
        return Ok(buf);
    }
    if let Some(path) = arg.strip_prefix('@') {
        return std::fs::read_to_string(path).with_context(|| format!("reading {path}"));
    }
    Ok(arg.to_string())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
