//! Main configuration types.
//!
//! This module provides the top-level [`TurnstileConfig`] struct and its builder.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, ExecutorSection, LogFormat, LoggingConfig, StageConfig};

/// Complete gateway configuration.
///
/// This is the root configuration type. Use [`ConfigLoader`](crate::ConfigLoader)
/// to load it from files and environment variables.
///
/// # Example
///
/// ```
/// use turnstile_config::TurnstileConfig;
///
/// let config = TurnstileConfig::default();
/// assert_eq!(config.executor.stage_timeout_ms, 5000);
/// assert!(config.stages.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct TurnstileConfig {
    /// Executor settings.
    #[serde(default)]
    pub executor: ExecutorSection,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Stages in declaration order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl TurnstileConfig {
    /// Create a new configuration builder.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_config::{StageConfig, StageKind, TurnstileConfig};
    ///
    /// let config = TurnstileConfig::builder()
    ///     .stage(StageConfig::new("request-logging", StageKind::Logging))
    ///     .build();
    ///
    /// assert_eq!(config.stages.len(), 1);
    /// ```
    #[must_use]
    pub fn builder() -> TurnstileConfigBuilder {
        TurnstileConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The log level is unknown
    /// - Two stages share a name
    /// - Any stage entry is invalid for its kind
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.logging.validate()?;

        let mut names = HashSet::with_capacity(self.stages.len());
        for (index, stage) in self.stages.iter().enumerate() {
            stage.validate(index)?;
            if !names.insert(stage.name.as_str()) {
                return Err(ConfigError::validation_error(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }

        Ok(())
    }

    /// Looks up a stage entry by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Create a development configuration preset.
    ///
    /// Pretty, colored, debug-level logs with source locations.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_config::TurnstileConfig;
    ///
    /// let config = TurnstileConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.logging.ansi_enabled = true;
        config.logging.include_location = true;

        config
    }
}

/// Builder for [`TurnstileConfig`].
#[derive(Debug, Default)]
pub struct TurnstileConfigBuilder {
    executor: Option<ExecutorSection>,
    logging: Option<LoggingConfig>,
    stages: Vec<StageConfig>,
}

impl TurnstileConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executor configuration.
    #[must_use]
    pub fn executor(mut self, executor: ExecutorSection) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }

    /// Append a stage entry.
    #[must_use]
    pub fn stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    /// Build the configuration.
    ///
    /// Any unset sections will use their default values.
    #[must_use]
    pub fn build(self) -> TurnstileConfig {
        TurnstileConfig {
            executor: self.executor.unwrap_or_default(),
            logging: self.logging.unwrap_or_default(),
            stages: self.stages,
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<TurnstileConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
