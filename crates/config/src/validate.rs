//! Configuration validation.
//!
//! Detects unknown or misspelled fields and values that would make the
//! scheduler misbehave at runtime (unknown timezones, zero intervals).

use std::{collections::HashMap, path::Path};

use crate::{
    env_subst::substitute_env,
    schema::{AutopilotConfig, StorageBackend},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// "syntax", "unknown-field", "type-error", "timezone", "range",
    /// "storage", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "scheduler.stats_timezone"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    /// Dynamic keys with scalar values.
    Map,
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    Struct(HashMap::from([
        (
            "scheduler",
            Struct(HashMap::from([
                ("stats_timezone", Leaf),
                ("default_timezone", Leaf),
                ("default_max_retries", Leaf),
                ("default_task_type", Leaf),
                ("tick_interval_secs", Leaf),
                ("claim_batch_size", Leaf),
                ("retention_days", Leaf),
            ])),
        ),
        (
            "storage",
            Struct(HashMap::from([("backend", Leaf), ("database_url", Leaf)])),
        ),
        (
            "metrics",
            Struct(HashMap::from([("enabled", Leaf), ("labels", Map)])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(c, d)| (d, c))
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one when
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        // Defaults still go through the semantic checks.
        let mut diagnostics = vec![Diagnostic {
            severity: Severity::Info,
            category: "file-ref",
            path: String::new(),
            message: "no config file found; using defaults".into(),
        }];
        check_semantics(&AutopilotConfig::default(), &mut diagnostics);
        return ValidationResult {
            diagnostics,
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let content = substitute_env(&content);
            let ext = actual_path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("toml");
            let mut result = match ext {
                "yaml" | "yml" => validate_value(
                    serde_yaml::from_str::<serde_yaml::Value>(&content)
                        .map_err(|e| e.to_string())
                        .and_then(|v| toml::Value::try_from(v).map_err(|e| e.to_string())),
                ),
                "json" => validate_value(
                    serde_json::from_str::<serde_json::Value>(&content)
                        .map_err(|e| e.to_string())
                        .and_then(|v| toml::Value::try_from(v).map_err(|e| e.to_string())),
                ),
                _ => validate_toml_str(&content),
            };
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML document without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    validate_value(toml::from_str::<toml::Value>(toml_str).map_err(|e| e.to_string()))
}

fn validate_value(parsed: Result<toml::Value, String>) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value = match parsed {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    match value.try_into::<AutopilotConfig>() {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let mut known_keys: Vec<&str> = fields.keys().copied().collect();
    known_keys.sort_unstable();

    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let level = if prefix.is_empty() {
            " at top level"
        } else {
            ""
        };
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
            None => format!("unknown field{level}"),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message,
        });
    }
}

fn check_timezone(name: &str, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    if name.parse::<chrono_tz::Tz>().is_err() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timezone",
            path: path.into(),
            message: format!("unknown IANA timezone \"{name}\""),
        });
    }
}

fn check_semantics(config: &AutopilotConfig, diagnostics: &mut Vec<Diagnostic>) {
    let sched = &config.scheduler;
    check_timezone(
        &sched.stats_timezone,
        "scheduler.stats_timezone",
        diagnostics,
    );
    check_timezone(
        &sched.default_timezone,
        "scheduler.default_timezone",
        diagnostics,
    );

    let zero_checks = [
        (
            sched.tick_interval_secs == 0,
            "scheduler.tick_interval_secs",
            "tick interval must be at least one second",
        ),
        (
            sched.retention_days == 0,
            "scheduler.retention_days",
            "retention of zero days would delete tasks as soon as they finish",
        ),
        (
            sched.claim_batch_size == 0,
            "scheduler.claim_batch_size",
            "claim batch size must be positive",
        ),
    ];
    for (is_zero, path, message) in zero_checks {
        if is_zero {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "range",
                path: path.into(),
                message: message.into(),
            });
        }
    }

    if sched.default_task_type.trim().is_empty() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "range",
            path: "scheduler.default_task_type".into(),
            message: "default task type must not be empty".into(),
        });
    }

    match config.storage.backend {
        StorageBackend::Memory => {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "storage",
                path: "storage.backend".into(),
                message: "memory backend keeps no state between runs and is not shared across processes".into(),
            });
            if config.storage.database_url.is_some() {
                diagnostics.push(Diagnostic {
                    severity: Severity::Info,
                    category: "storage",
                    path: "storage.database_url".into(),
                    message: "database_url is ignored by the memory backend".into(),
                });
            }
        },
        StorageBackend::Sqlite => {
            if let Some(url) = &config.storage.database_url
                && !url.starts_with("sqlite:")
            {
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "storage",
                    path: "storage.database_url".into(),
                    message: format!("expected a sqlite: URL, got \"{url}\""),
                });
            }
        },
    }
}
