use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Context, Error, Result},
    schema::AutopilotConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "autopilot.toml",
    "autopilot.yaml",
    "autopilot.yml",
    "autopilot.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<AutopilotConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("parsing {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./autopilot.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/autopilot/autopilot.{toml,yaml,yml,json}` (user-global)
///
/// Returns `AutopilotConfig::default()` if no config file is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> AutopilotConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    AutopilotConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "autopilot")
}

/// Returns the user-global config directory (`~/.config/autopilot/`).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().to_path_buf())
}

/// Directory holding the default database. Falls back to `./` when the
/// platform has no home directory.
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `sqlite://<data_dir>/autopilot.db?mode=rwc`
pub fn default_database_url() -> String {
    format!(
        "sqlite://{}?mode=rwc",
        data_dir().join("autopilot.db").display()
    )
}

/// Serialize `config` to TOML at `path`, creating parent directories.
pub fn save_config(config: &AutopilotConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| Error::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_str).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> Result<AutopilotConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::StorageBackend};

    #[test]
    fn test_load_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autopilot.toml");
        std::fs::write(
            &path,
            "[scheduler]\nretention_days = 7\n\n[storage]\nbackend = \"memory\"\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.scheduler.retention_days, 7);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_load_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("autopilot.yaml");
        std::fs::write(&yaml, "scheduler:\n  stats_timezone: Asia/Tokyo\n").unwrap();
        assert_eq!(
            load_config(&yaml).unwrap().scheduler.stats_timezone,
            "Asia/Tokyo"
        );

        let json = dir.path().join("autopilot.json");
        std::fs::write(&json, r#"{"scheduler":{"claim_batch_size":5}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().scheduler.claim_batch_size, 5);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autopilot.ini");
        std::fs::write(&path, "").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains(".ini"), "{err}");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = load_config(Path::new("/nonexistent/autopilot.toml")).unwrap_err();
        assert!(matches!(err, Error::Read { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/autopilot.toml");
        let mut cfg = AutopilotConfig::default();
        cfg.scheduler.tick_interval_secs = 15;
        cfg.storage.database_url = Some("sqlite::memory:".into());

        save_config(&cfg, &path).unwrap();
        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn test_default_database_url_points_at_data_dir() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("autopilot.db?mode=rwc"));
    }
}
