use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use autopilot_config::{
    AutopilotConfig, default_database_url,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration as TOML.
    Show,
    /// Write a default config file.
    Init {
        /// Destination (defaults to `./autopilot.toml`).
        #[arg(long)]
        path: Option<std::path::PathBuf>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(config_path, verbose),
        ConfigAction::Show => show(config_path),
        ConfigAction::Init { path, force } => {
            let path = path.unwrap_or_else(|| "autopilot.toml".into());
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            autopilot_config::save_config(&AutopilotConfig::default(), &path)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        },
    }
}

fn show(config_path: Option<&Path>) -> Result<()> {
    let mut config = crate::context::load_config(config_path)?;
    if config.storage.database_url.is_none() {
        config.storage.database_url = Some(default_database_url());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(config_path);

    match &result.config_path {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let lines = diagnostic_lines(&result, verbose);
    for line in &lines {
        eprintln!("  {line}");
    }
    if !lines.is_empty() {
        eprintln!();
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn diagnostic_lines(result: &validate::ValidationResult, verbose: bool) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
                Severity::Info => CYAN,
            };
            let label = d.severity;
            if d.path.is_empty() {
                format!("{BOLD}{color}{label}{RESET} {}", d.message)
            } else {
                format!("{BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
            }
        })
        .collect()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_hidden_unless_verbose() {
        let result = validate::validate_toml_str("[storage]\nbackend = \"memory\"\n");
        let quiet = diagnostic_lines(&result, false);
        let verbose = diagnostic_lines(&result, true);
        assert_eq!(quiet.len(), 1);
        assert!(quiet[0].contains("storage.backend"));
        assert_eq!(verbose.len(), result.diagnostics.len());
    }

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autopilot.toml");
        handle_config(
            ConfigAction::Init {
                path: Some(path.clone()),
                force: false,
            },
            None,
        )
        .unwrap();
        assert_eq!(
            autopilot_config::load_config(&path).unwrap(),
            AutopilotConfig::default()
        );

        let again = handle_config(
            ConfigAction::Init {
                path: Some(path),
                force: false,
            },
            None,
        );
        assert!(again.is_err());
    }
}
