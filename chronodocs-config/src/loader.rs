use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::debug;

use crate::models::ChronodocsConfig;

/// Environment variable naming a TOML or JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "CHRONODOCS_CONFIG_PATH";

/// Environment variable holding inline JSON configuration.
pub const CONFIG_JSON_ENV: &str = "CHRONODOCS_CONFIG_JSON";

/// Files looked up under the repository root, in order.
pub const DEFAULT_FILE_CANDIDATES: &[&str] = &[".chronodocs.toml", ".chronodocs.json"];

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    Explicit(PathBuf),
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("built-in defaults"),
            ConfigSource::Explicit(path) => write!(f, "{}", path.display()),
            ConfigSource::EnvPath(path) => {
                write!(f, "{} (from ${CONFIG_PATH_ENV})", path.display())
            }
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl ChronodocsConfig {
    /// Load and validate configuration.
    ///
    /// Evaluation order:
    /// 1) `explicit` path, when given,
    /// 2) `$CHRONODOCS_CONFIG_PATH` (TOML or JSON file),
    /// 3) `$CHRONODOCS_CONFIG_JSON` (inline JSON),
    /// 4) `.chronodocs.toml` or `.chronodocs.json` under `repo_root`,
    /// 5) defaults.
    pub fn load(
        explicit: Option<&Path>,
        repo_root: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with_env(explicit, repo_root, |key| env::var(key).ok())
    }

    /// [`load`](Self::load) with a caller-supplied environment lookup.
    pub fn load_with_env<F>(
        explicit: Option<&Path>,
        repo_root: &Path,
        lookup: F,
    ) -> anyhow::Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (config, source) = Self::resolve(explicit, repo_root, lookup)?;
        config
            .validate()
            .with_context(|| format!("invalid configuration in {source}"))?;
        debug!(%source, "configuration loaded");
        Ok((config, source))
    }

    fn resolve<F>(
        explicit: Option<&Path>,
        repo_root: &Path,
        lookup: F,
    ) -> anyhow::Result<(Self, ConfigSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            return Ok((config, ConfigSource::Explicit(path.to_path_buf())));
        }

        if let Some(path_str) = lookup(CONFIG_PATH_ENV)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str.trim());
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((parsed, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(repo_root) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid config {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parse as TOML, falling back to JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
    }

    fn find_default_file(repo_root: &Path) -> Option<PathBuf> {
        DEFAULT_FILE_CANDIDATES
            .iter()
            .map(|name| repo_root.join(name))
            .find(|path| path.is_file())
    }
}
