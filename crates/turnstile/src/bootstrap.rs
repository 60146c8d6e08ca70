//! Turning configuration entries into registered stages.

use std::sync::Arc;

use tracing::Level;
use turnstile_config::{RateLimitKeySetting, StageConfig, StageKind};
use turnstile_middleware::stages::authentication::API_KEY_HEADER;
use turnstile_middleware::stages::{
    AccessStage, AuthenticationStage, Clock, ContentTypeStage, LoggingStage, RateLimitKey,
    RateLimitStage, RateLimitStore, StaticCredentials, SystemClock, DEFAULT_SWEEP_INTERVAL,
};
use turnstile_middleware::{Stage, StageDescriptor, StageRegistry};

use crate::error::{BootstrapError, BootstrapResult};

/// Builds reference stages from [`StageConfig`] entries.
///
/// Every rate-limit stage gets its own [`RateLimitStore`] on the factory's
/// clock, so two throttles never share counters. Each store sweeps closed
/// windows every [`sweep_interval`](Self::with_sweep_interval) checks.
///
/// # Example
///
/// ```
/// use turnstile::bootstrap::StageFactory;
/// use turnstile::config::{StageConfig, StageKind};
///
/// let mut entry = StageConfig::new("allow-list", StageKind::Access);
/// entry.allowed_addresses = vec!["10.0.0.1".to_string()];
///
/// let descriptor = StageFactory::new().build(&entry).unwrap();
/// assert_eq!(descriptor.name(), "allow-list");
/// ```
#[derive(Clone)]
pub struct StageFactory {
    clock: Arc<dyn Clock>,
    sweep_interval: u64,
}

impl std::fmt::Debug for StageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageFactory")
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

impl Default for StageFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StageFactory {
    /// A factory on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A factory whose rate limiters read `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sets how many checks each rate-limit store makes between sweeps.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Builds the descriptor for one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry is invalid for its kind or a path
    /// pattern does not parse.
    pub fn build(&self, entry: &StageConfig) -> BootstrapResult<StageDescriptor> {
        let stage = self.stage(entry)?;

        let mut builder = StageDescriptor::builder_shared(entry.name.clone(), stage)
            .paths(&entry.paths)
            .priority(entry.priority);
        if let Some(timeout) = entry.timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(builder.build()?)
    }

    /// Validates, builds, and registers every entry in declaration order.
    ///
    /// Declaration order is the tie-break for equal priorities.
    ///
    /// # Errors
    ///
    /// Stops at the first entry that fails.
    pub fn build_registry(&self, entries: &[StageConfig]) -> BootstrapResult<StageRegistry> {
        let registry = StageRegistry::new();
        for (index, entry) in entries.iter().enumerate() {
            entry.validate(index)?;
            registry.register(self.build(entry)?)?;
            tracing::debug!(
                stage = %entry.name,
                kind = %entry.kind,
                priority = entry.priority,
                paths = ?entry.paths,
                "stage configured"
            );
        }
        Ok(registry)
    }

    fn stage(&self, entry: &StageConfig) -> BootstrapResult<Arc<dyn Stage>> {
        let stage: Arc<dyn Stage> = match entry.kind {
            StageKind::Logging => {
                let level = match entry.level.as_deref() {
                    Some(raw) => raw
                        .parse::<Level>()
                        .map_err(|e| BootstrapError::invalid_stage(&entry.name, e.to_string()))?,
                    None => Level::INFO,
                };
                Arc::new(
                    LoggingStage::new()
                        .level(level)
                        .with_user_agent(entry.user_agent.unwrap_or(false)),
                )
            }
            StageKind::ApiKey => {
                let header = entry.header.as_deref().unwrap_or(API_KEY_HEADER);
                let mut stage =
                    AuthenticationStage::api_key(header, StaticCredentials::api_keys(&entry.keys));
                if let Some(body) = &entry.failure_body {
                    stage = stage.with_failure_body(body.clone());
                }
                Arc::new(stage)
            }
            StageKind::Bearer => {
                let mut stage =
                    AuthenticationStage::bearer(StaticCredentials::bearer_tokens(&entry.tokens));
                if let Some(body) = &entry.failure_body {
                    stage = stage.with_failure_body(body.clone());
                }
                Arc::new(stage)
            }
            StageKind::Access => {
                let mut stage = AccessStage::new(entry.addresses()?)
                    .trust_forwarded(entry.trust_forwarded.unwrap_or(false));
                if let Some(body) = &entry.failure_body {
                    stage = stage.with_forbidden_body(body.clone());
                }
                Arc::new(stage)
            }
            StageKind::RateLimit => {
                let limit = entry.max_requests.filter(|n| *n > 0).ok_or_else(|| {
                    BootstrapError::invalid_stage(&entry.name, "max_requests must be greater than 0")
                })?;
                let window = entry.window();
                if window.is_zero() {
                    return Err(BootstrapError::invalid_stage(
                        &entry.name,
                        "window_millis must be greater than 0",
                    ));
                }
                let key = match entry.rate_limit_key()? {
                    RateLimitKeySetting::Address => RateLimitKey::Address,
                    RateLimitKeySetting::Principal => RateLimitKey::Principal,
                    RateLimitKeySetting::Header(name) => RateLimitKey::Header(name),
                    RateLimitKeySetting::Global => RateLimitKey::Global,
                };
                Arc::new(
                    RateLimitStage::builder()
                        .limit(limit)
                        .window(window)
                        .key(key)
                        .trust_forwarded(entry.trust_forwarded.unwrap_or(false))
                        .store(Arc::new(
                            RateLimitStore::with_clock(Arc::clone(&self.clock))
                                .with_sweep_interval(self.sweep_interval),
                        ))
                        .build(),
                )
            }
            StageKind::ContentType => {
                let mut stage = ContentTypeStage::new(&entry.allowed_types)
                    .require(entry.require.unwrap_or(false));
                if entry.body_methods_only.unwrap_or(false) {
                    stage = stage.body_methods_only();
                }
                if let Some(body) = &entry.failure_body {
                    stage = stage.with_unsupported_body(body.clone());
                }
                Arc::new(stage)
            }
        };
        Ok(stage)
    }
}

/// Builds a registry from configuration entries on the system clock.
///
/// # Errors
///
/// Returns the first configuration fault encountered.
pub fn build_registry(entries: &[StageConfig]) -> BootstrapResult<StageRegistry> {
    StageFactory::new().build_registry(entries)
}
