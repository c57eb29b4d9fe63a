use thiserror::Error;

use crate::models::{ChronodocsConfig, PHASE_PLACEHOLDER};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("phase_dir_template '{0}' does not contain {{phase}}")]
    MissingPhasePlaceholder(String),
    #[error("invalid ignore pattern '{pattern}'")]
    InvalidIgnorePattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("invalid phase name '{0}'")]
    InvalidPhaseName(String),
    #[error("logging.level must not be empty")]
    EmptyLogLevel,
}

impl ChronodocsConfig {
    /// Reject values that would make every later operation fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.phase_dir_template.contains(PHASE_PLACEHOLDER) {
            return Err(ConfigError::MissingPhasePlaceholder(
                self.phase_dir_template.clone(),
            ));
        }

        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern.trim()).map_err(|source| {
                ConfigError::InvalidIgnorePattern {
                    pattern: pattern.clone(),
                    source,
                }
            })?;
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::EmptyLogLevel);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ChronodocsConfig::default().validate().unwrap();
    }

    #[test]
    fn template_without_placeholder_is_rejected() {
        let config = ChronodocsConfig {
            phase_dir_template: "docs/progress".to_string(),
            ..ChronodocsConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingPhasePlaceholder(_)));
        assert!(err.to_string().contains("{phase}"));
    }

    #[test]
    fn broken_glob_is_rejected() {
        let config = ChronodocsConfig {
            ignore_patterns: vec!["*.bak".to_string(), "[oops".to_string()],
            ..ChronodocsConfig::default()
        };
        match config.validate() {
            Err(ConfigError::InvalidIgnorePattern { pattern, .. }) => {
                assert_eq!(pattern, "[oops")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
