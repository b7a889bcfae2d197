//! Configuration loading and validation.
//!
//! Config files: `autopilot.toml`, `autopilot.yaml`, or `autopilot.json`,
//! searched in `./` then `~/.config/autopilot/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        config_dir, data_dir, default_database_url, discover_and_load, load_config, save_config,
    },
    schema::{AutopilotConfig, MetricsConfig, SchedulerConfig, StorageBackend, StorageConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_toml_str},
};
