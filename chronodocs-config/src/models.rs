use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chronodocs_core::{IgnoreSet, SchedulerConfig};
use serde::{Deserialize, Serialize};

use crate::validation::ConfigError;

/// Placeholder substituted with the phase name in `phase_dir_template`.
pub const PHASE_PLACEHOLDER: &str = "{phase}";

/// Top-level settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChronodocsConfig {
    /// Watched directory relative to the repository root; must contain
    /// `{phase}`.
    pub phase_dir_template: String,
    /// Extra file-name globs excluded from ranking. Index files, the change
    /// log and temp/lock/backup files are always excluded.
    #[serde(alias = "ignorePatterns")]
    pub ignore_patterns: Vec<String>,
    pub debounce: DebounceConfig,
    pub logging: LoggingConfig,
}

impl Default for ChronodocsConfig {
    fn default() -> Self {
        Self {
            phase_dir_template: ".devcontext/progress/{phase}".to_string(),
            ignore_patterns: Vec::new(),
            debounce: DebounceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Scheduler timing, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Quiet period after the last change before a pass runs.
    #[serde(alias = "debounce_interval_ms", alias = "debounceIntervalMs")]
    pub phase: u64,
    /// Minimum spacing between the end of one pass and the next.
    #[serde(alias = "min_interval_ms", alias = "minIntervalMs")]
    pub min_interval_phase: u64,
    /// Upper bound of the random delay added to each debounce.
    pub jitter_max: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            phase: 2_000,
            min_interval_phase: 8_000,
            jitter_max: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl ChronodocsConfig {
    /// Directory watched for `phase`, under `repo_root`.
    pub fn phase_dir(&self, repo_root: &Path, phase: &str) -> Result<PathBuf, ConfigError> {
        let phase = phase.trim();
        let invalid = phase.is_empty()
            || phase == "."
            || phase == ".."
            || phase.contains(['/', '\\']);
        if invalid {
            return Err(ConfigError::InvalidPhaseName(phase.to_string()));
        }
        if !self.phase_dir_template.contains(PHASE_PLACEHOLDER) {
            return Err(ConfigError::MissingPhasePlaceholder(
                self.phase_dir_template.clone(),
            ));
        }

        let relative = self.phase_dir_template.replace(PHASE_PLACEHOLDER, phase);
        Ok(repo_root.join(relative))
    }

    pub fn scheduler_settings(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce_interval: Duration::from_millis(self.debounce.phase),
            min_interval: Duration::from_millis(self.debounce.min_interval_phase),
            jitter_max: Duration::from_millis(self.debounce.jitter_max),
        }
    }

    pub fn ignore_set(&self) -> IgnoreSet {
        IgnoreSet::new(&self.ignore_patterns)
    }

    /// Render as TOML, the format `config show` prints.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
