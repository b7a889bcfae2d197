//! Config schema for the scheduler binary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

/// Scheduling behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// IANA zone whose midnight starts "today" in stats.
    pub stats_timezone: String,
    /// Zone given to schedules created without one.
    pub default_timezone: String,
    pub default_max_retries: u32,
    pub default_task_type: String,
    /// Seconds between due checks in `tick` mode.
    pub tick_interval_secs: u64,
    /// Pending tasks listed per poll.
    pub claim_batch_size: usize,
    /// Days a finished task is kept before cleanup removes it.
    pub retention_days: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stats_timezone: "UTC".into(),
            default_timezone: "America/New_York".into(),
            default_max_retries: 3,
            default_task_type: "generate-article".into(),
            tick_interval_secs: 60,
            claim_batch_size: 25,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    /// Process-local, lost on exit.
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// sqlx connection URL. Unset means `<data_dir>/autopilot.db`.
    pub database_url: Option<String>,
}

impl StorageConfig {
    /// The configured URL, or the default database under the data directory.
    #[must_use]
    pub fn resolved_database_url(&self) -> String {
        self.database_url
            .clone()
            .unwrap_or_else(crate::loader::default_database_url)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Global labels attached to every metric.
    pub labels: BTreeMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            labels: BTreeMap::new(),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_gives_defaults() {
        let cfg: AutopilotConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, AutopilotConfig::default());
        assert_eq!(cfg.scheduler.stats_timezone, "UTC");
        assert_eq!(cfg.scheduler.retention_days, 30);
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: AutopilotConfig = toml::from_str(
            r#"
            [scheduler]
            stats_timezone = "Europe/Berlin"

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.scheduler.stats_timezone, "Europe/Berlin");
        assert_eq!(cfg.scheduler.default_max_retries, 3);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_explicit_database_url_wins() {
        let storage = StorageConfig {
            backend: StorageBackend::Sqlite,
            database_url: Some("sqlite::memory:".into()),
        };
        assert_eq!(storage.resolved_database_url(), "sqlite::memory:");
    }
}
