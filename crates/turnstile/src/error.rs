//! Startup errors.

use thiserror::Error;
use turnstile_config::ConfigError;
use turnstile_middleware::RegistryError;
use turnstile_telemetry::TelemetryError;

/// Anything that stops a gateway from being assembled.
///
/// All of these are configuration faults: they surface before the first
/// request and nothing serves until they are fixed.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A stage could not be registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Logging or metrics could not be installed.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// A stage entry passed validation but could not be turned into a stage.
    #[error("stage '{name}' is invalid: {reason}")]
    InvalidStage {
        /// Stage name.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl BootstrapError {
    /// Create a new invalid stage error.
    pub fn invalid_stage(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidStage {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for gateway assembly.
pub type BootstrapResult<T> = Result<T, BootstrapError>;
