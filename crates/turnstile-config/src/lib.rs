//! Typed configuration for the Turnstile gateway.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! Everything hangs off [`TurnstileConfig`]:
//!
//! - [`ExecutorSection`] - per-stage time budget
//! - [`LoggingConfig`] - log level and output format
//! - [`StageConfig`] - one entry per stage, tagged by [`StageKind`]
//!
//! # Example
//!
//! ```no_run
//! use turnstile_config::ConfigLoader;
//!
//! # fn main() -> Result<(), turnstile_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_file("gateway.toml")?
//!     .with_env_prefix("TURNSTILE")
//!     .load()?;
//!
//! println!("{} stages configured", config.stages.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [executor]
//! stage_timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [[stages]]
//! name = "api-key"
//! kind = "api_key"
//! paths = ["/api/**"]
//! priority = 10
//! header = "X-API-KEY"
//! keys = ["my-secret-key"]
//! failure_body = "Invalid API Key"
//!
//! [[stages]]
//! name = "throttle"
//! kind = "rate_limit"
//! max_requests = 10
//! window_millis = 60000
//! key = "address"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Scalar settings can be overridden with `PREFIX__SECTION__KEY`:
//!
//! - `TURNSTILE__EXECUTOR__STAGE_TIMEOUT_MS=2000`
//! - `TURNSTILE__LOGGING__LEVEL=debug`
//! - `TURNSTILE__LOGGING__FORMAT=pretty`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{TurnstileConfig, TurnstileConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{
    ExecutorSection, LogFormat, LoggingConfig, RateLimitKeySetting, StageConfig, StageKind,
};
