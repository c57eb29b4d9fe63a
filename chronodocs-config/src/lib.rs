//! Configuration library for chronodocs.
//!
//! Defines the on-disk configuration model, resolves which source to load it
//! from (explicit path, environment, repository file or defaults) and checks
//! the values the core cannot repair on its own.

#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{CONFIG_JSON_ENV, CONFIG_PATH_ENV, ConfigSource, DEFAULT_FILE_CANDIDATES};
pub use models::{ChronodocsConfig, DebounceConfig, LogFormat, LoggingConfig};
pub use validation::ConfigError;
