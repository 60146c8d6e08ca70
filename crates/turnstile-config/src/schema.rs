//! Configuration schema types.
//!
//! This module defines the structure of every configuration section.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use turnstile_telemetry::LogConfig;

use crate::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Executor configuration section.
///
/// # Example
///
/// ```
/// use turnstile_config::ExecutorSection;
/// use std::time::Duration;
///
/// let section = ExecutorSection::default();
/// assert_eq!(section.stage_timeout(), Some(Duration::from_secs(5)));
///
/// let unbounded = ExecutorSection { stage_timeout_ms: 0 };
/// assert_eq!(unbounded.stage_timeout(), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSection {
    /// Default per-stage time budget in milliseconds. `0` disables it.
    #[serde(default = "default_stage_timeout_ms")]
    pub stage_timeout_ms: u64,
}

impl ExecutorSection {
    /// Returns the per-stage budget, or `None` when disabled.
    #[must_use]
    pub const fn stage_timeout(&self) -> Option<Duration> {
        if self.stage_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.stage_timeout_ms))
        }
    }
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            stage_timeout_ms: default_stage_timeout_ms(),
        }
    }
}

const fn default_stage_timeout_ms() -> u64 {
    5_000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable multi-line output.
    Pretty,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Whether to install a subscriber at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Minimum level or a full `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Colored output. Only honoured for [`LogFormat::Pretty`].
    #[serde(default)]
    pub ansi_enabled: bool,

    /// Include source file and line.
    #[serde(default)]
    pub include_location: bool,
}

impl LoggingConfig {
    /// Converts this section into the telemetry crate's logging settings.
    ///
    /// # Example
    ///
    /// ```
    /// use turnstile_config::{LogFormat, LoggingConfig};
    ///
    /// let section = LoggingConfig { format: LogFormat::Pretty, ..Default::default() };
    /// assert!(!section.to_log_config().json_format);
    /// ```
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            enabled: self.enabled,
            level: self.level.clone(),
            json_format: self.format == LogFormat::Json,
            ansi_enabled: self.ansi_enabled && self.format == LogFormat::Pretty,
            file_line_info: self.include_location,
            ..LogConfig::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        // Directives like `turnstile=debug,info` are left to the filter parser.
        let simple = !self.level.contains('=') && !self.level.contains(',');
        if simple && !is_log_level(&self.level) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!("unknown level '{}', expected one of {LOG_LEVELS:?}", self.level),
            ));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::Json,
            ansi_enabled: false,
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

fn is_log_level(level: &str) -> bool {
    LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str())
}

/// Which reference stage a [`StageConfig`] builds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Request logging; always continues.
    Logging,
    /// Static API key check (401).
    ApiKey,
    /// Static bearer token check (401).
    Bearer,
    /// Client address allow-list (403).
    Access,
    /// Fixed-window rate limit (429).
    RateLimit,
    /// Content-Type allow-list (415).
    ContentType,
}

impl StageKind {
    /// The name used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Logging => "logging",
            Self::ApiKey => "api_key",
            Self::Bearer => "bearer",
            Self::Access => "access",
            Self::RateLimit => "rate_limit",
            Self::ContentType => "content_type",
        }
    }

    // Kind-specific fields this kind accepts.
    const fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Logging => &["level", "user_agent"],
            Self::ApiKey => &["header", "keys", "failure_body"],
            Self::Bearer => &["tokens", "failure_body"],
            Self::Access => &["allowed_addresses", "trust_forwarded", "failure_body"],
            Self::RateLimit => &["max_requests", "window_millis", "key", "trust_forwarded"],
            Self::ContentType => &["allowed_types", "require", "body_methods_only", "failure_body"],
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a rate-limit stage keys its counters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RateLimitKeySetting {
    /// Per client address.
    #[default]
    Address,
    /// Per authenticated principal, falling back to the address.
    Principal,
    /// Per value of the named header.
    Header(String),
    /// One counter for everyone.
    Global,
}

impl std::str::FromStr for RateLimitKeySetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "address" => Ok(Self::Address),
            "principal" => Ok(Self::Principal),
            "global" => Ok(Self::Global),
            other => match other.strip_prefix("header:") {
                Some(name) if http::HeaderName::from_bytes(name.trim().as_bytes()).is_ok() => {
                    Ok(Self::Header(name.trim().to_string()))
                }
                _ => Err(format!(
                    "expected 'address', 'principal', 'global' or 'header:<name>', got '{other}'"
                )),
            },
        }
    }
}

/// One `[[stages]]` entry.
///
/// The common fields apply to every kind; the rest are read only by the
/// kind that owns them and rejected on any other.
///
/// # Example
///
/// ```
/// use turnstile_config::{StageConfig, StageKind};
///
/// let stage: StageConfig = toml::from_str(r#"
///     name = "throttle"
///     kind = "rate_limit"
///     max_requests = 10
///     window_millis = 60000
/// "#).unwrap();
///
/// assert_eq!(stage.kind, StageKind::RateLimit);
/// assert_eq!(stage.paths, vec!["/**"]);
/// assert!(stage.validate(0).is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Unique stage name.
    pub name: String,

    /// Which stage to build.
    pub kind: StageKind,

    /// Path patterns the stage applies to.
    #[serde(default = "default_paths")]
    pub paths: Vec<String>,

    /// Lower runs earlier.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Overrides the executor's per-stage budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Rejection body for the 401/403/415 stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_body: Option<String>,

    /// API key header name. Defaults to `X-API-KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,

    /// Accepted API keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,

    /// Accepted bearer tokens.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,

    /// Allowed client addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_addresses: Vec<String>,

    /// Take the client address from `X-Forwarded-For`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_forwarded: Option<bool>,

    /// Requests allowed per window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u64>,

    /// Window length in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_millis: Option<u64>,

    /// Counter key: `address`, `principal`, `global` or `header:<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Accepted media types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_types: Vec<String>,

    /// Reject requests without a `Content-Type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require: Option<bool>,

    /// Only check POST, PUT and PATCH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_methods_only: Option<bool>,

    /// Level for request logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Include the User-Agent in request logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<bool>,
}

fn default_paths() -> Vec<String> {
    vec!["/**".to_string()]
}

const fn default_priority() -> i32 {
    100
}

impl StageConfig {
    /// Creates an entry of `kind` with every optional field unset.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            paths: default_paths(),
            priority: default_priority(),
            timeout_ms: None,
            failure_body: None,
            header: None,
            keys: Vec::new(),
            tokens: Vec::new(),
            allowed_addresses: Vec::new(),
            trust_forwarded: None,
            max_requests: None,
            window_millis: None,
            key: None,
            allowed_types: Vec::new(),
            require: None,
            body_methods_only: None,
            level: None,
            user_agent: None,
        }
    }

    /// The per-stage budget override, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// The rate-limit window. Zero when unset.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis.unwrap_or_default())
    }

    /// Parses `allowed_addresses`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first bad entry.
    pub fn addresses(&self) -> Result<Vec<IpAddr>, ConfigError> {
        self.allowed_addresses
            .iter()
            .map(|raw| {
                raw.trim().parse().map_err(|_| {
                    ConfigError::invalid_value(
                        format!("stages.{}.allowed_addresses", self.name),
                        format!("'{raw}' is not an IP address"),
                    )
                })
            })
            .collect()
    }

    /// Parses `key`, defaulting to per-address counting.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown key form.
    pub fn rate_limit_key(&self) -> Result<RateLimitKeySetting, ConfigError> {
        self.key.as_deref().map_or(Ok(RateLimitKeySetting::Address), |raw| {
            raw.parse()
                .map_err(|reason| ConfigError::invalid_value(format!("stages.{}.key", self.name), reason))
        })
    }

    /// Validates the entry at position `index`.
    ///
    /// Path patterns are only checked for shape here; the registry parses
    /// them when the stage is registered.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let at = |field: &str| format!("stages[{index}].{field}");

        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_value(at("name"), "must not be empty"));
        }
        if self.paths.is_empty() {
            return Err(ConfigError::invalid_value(at("paths"), "must list at least one pattern"));
        }
        if let Some(path) = self.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::invalid_value(
                at("paths"),
                format!("pattern '{path}' must start with '/'"),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(ConfigError::invalid_value(at("timeout_ms"), "must be greater than 0"));
        }
        if let Some(field) = self.stray_field() {
            return Err(ConfigError::invalid_value(
                at(field),
                format!("does not apply to stage kind '{}'", self.kind),
            ));
        }

        match self.kind {
            StageKind::Logging => {
                if let Some(level) = self.level.as_deref().filter(|l| !is_log_level(l)) {
                    return Err(ConfigError::invalid_value(
                        at("level"),
                        format!("unknown level '{level}'"),
                    ));
                }
            }
            StageKind::ApiKey => {
                if self.keys.is_empty() {
                    return Err(ConfigError::invalid_value(at("keys"), "must list at least one key"));
                }
                if let Some(header) = self.header.as_deref() {
                    if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                        return Err(ConfigError::invalid_value(
                            at("header"),
                            format!("'{header}' is not a valid header name"),
                        ));
                    }
                }
            }
            StageKind::Bearer => {
                if self.tokens.is_empty() {
                    return Err(ConfigError::invalid_value(at("tokens"), "must list at least one token"));
                }
            }
            StageKind::Access => {
                if self.allowed_addresses.is_empty() {
                    return Err(ConfigError::invalid_value(
                        at("allowed_addresses"),
                        "must list at least one address",
                    ));
                }
                self.addresses()?;
            }
            StageKind::RateLimit => {
                match self.max_requests {
                    None => return Err(ConfigError::invalid_value(at("max_requests"), "is required")),
                    Some(0) => {
                        return Err(ConfigError::invalid_value(at("max_requests"), "must be greater than 0"))
                    }
                    Some(_) => {}
                }
                match self.window_millis {
                    None => return Err(ConfigError::invalid_value(at("window_millis"), "is required")),
                    Some(0) => {
                        return Err(ConfigError::invalid_value(at("window_millis"), "must be greater than 0"))
                    }
                    Some(_) => {}
                }
                self.rate_limit_key()?;
            }
            StageKind::ContentType => {
                if self.allowed_types.is_empty() {
                    return Err(ConfigError::invalid_value(
                        at("allowed_types"),
                        "must list at least one media type",
                    ));
                }
                if let Some(bad) = self.allowed_types.iter().find(|t| !t.contains('/')) {
                    return Err(ConfigError::invalid_value(
                        at("allowed_types"),
                        format!("'{bad}' is not a media type"),
                    ));
                }
            }
        }

        Ok(())
    }

    // First kind-specific field that is set but not owned by `kind`.
    fn stray_field(&self) -> Option<&'static str> {
        let set: [(&'static str, bool); 14] = [
            ("failure_body", self.failure_body.is_some()),
            ("header", self.header.is_some()),
            ("keys", !self.keys.is_empty()),
            ("tokens", !self.tokens.is_empty()),
            ("allowed_addresses", !self.allowed_addresses.is_empty()),
            ("trust_forwarded", self.trust_forwarded.is_some()),
            ("max_requests", self.max_requests.is_some()),
            ("window_millis", self.window_millis.is_some()),
            ("key", self.key.is_some()),
            ("allowed_types", !self.allowed_types.is_empty()),
            ("require", self.require.is_some()),
            ("body_methods_only", self.body_methods_only.is_some()),
            ("level", self.level.is_some()),
            ("user_agent", self.user_agent.is_some()),
        ];
        let owned = self.kind.fields();
        set.into_iter()
            .find(|(field, present)| *present && !owned.contains(field))
            .map(|(field, _)| field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> StageConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn test_executor_defaults() {
        let section: ExecutorSection = toml::from_str("").unwrap();
        assert_eq!(section.stage_timeout_ms, 5_000);
        assert_eq!(section.stage_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_logging_conversion() {
        let section = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            ansi_enabled: true,
            ..Default::default()
        };
        let log = section.to_log_config();
        assert_eq!(log.level, "debug");
        assert!(!log.json_format);
        assert!(log.ansi_enabled);

        let json = LoggingConfig {
            ansi_enabled: true,
            ..Default::default()
        };
        assert!(!json.to_log_config().ansi_enabled);
    }

    #[test]
    fn test_logging_level_validation() {
        let mut section = LoggingConfig::default();
        assert!(section.validate().is_ok());

        section.level = "WARN".to_string();
        assert!(section.validate().is_ok());

        section.level = "turnstile=debug,info".to_string();
        assert!(section.validate().is_ok());

        section.level = "chatty".to_string();
        assert!(section.validate().is_err());
    }

    #[test]
    fn test_stage_defaults() {
        let stage = parse(r#"
            name = "log"
            kind = "logging"
        "#);
        assert_eq!(stage.paths, vec!["/**"]);
        assert_eq!(stage.priority, 100);
        assert_eq!(stage.timeout(), None);
        assert!(stage.validate(0).is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<StageConfig, _> = toml::from_str(r#"
            name = "log"
            kind = "logging"
            colour = "blue"
        "#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result: Result<StageConfig, _> = toml::from_str(r#"
            name = "x"
            kind = "firewall"
        "#);
        assert!(result.is_err());
    }

    #[test]
    fn test_stray_field_rejected() {
        let stage = parse(r#"
            name = "auth"
            kind = "api_key"
            keys = ["k"]
            max_requests = 10
        "#);
        let err = stage.validate(3).unwrap_err().to_string();
        assert!(err.contains("stages[3].max_requests"), "{err}");
        assert!(err.contains("api_key"), "{err}");
    }

    #[test]
    fn test_api_key_requires_keys() {
        let stage = StageConfig::new("auth", StageKind::ApiKey);
        assert!(stage.validate(0).is_err());
    }

    #[test]
    fn test_api_key_header_must_be_a_header_name() {
        let mut stage = StageConfig::new("auth", StageKind::ApiKey);
        stage.keys.push("my-secret-key".to_string());
        stage.header = Some("X-API-KEY".to_string());
        assert!(stage.validate(0).is_ok());

        stage.header = Some("X API KEY".to_string());
        let err = stage.validate(2).unwrap_err().to_string();
        assert!(err.contains("stages[2].header"), "{err}");

        stage.header = Some(String::new());
        assert!(stage.validate(0).is_err());
    }

    #[test]
    fn test_bearer_requires_tokens() {
        let mut stage = StageConfig::new("bearer", StageKind::Bearer);
        assert!(stage.validate(0).is_err());
        stage.tokens.push("my-token".to_string());
        assert!(stage.validate(0).is_ok());
    }

    #[test]
    fn test_access_addresses() {
        let mut stage = StageConfig::new("allow", StageKind::Access);
        stage.allowed_addresses = vec!["10.0.0.1".to_string(), " ::1 ".to_string()];
        assert_eq!(stage.addresses().unwrap().len(), 2);
        assert!(stage.validate(0).is_ok());

        stage.allowed_addresses.push("localhost".to_string());
        let err = stage.validate(0).unwrap_err().to_string();
        assert!(err.contains("localhost"));
    }

    #[test]
    fn test_rate_limit_validation() {
        let mut stage = StageConfig::new("throttle", StageKind::RateLimit);
        assert!(stage.validate(0).is_err());

        stage.max_requests = Some(10);
        stage.window_millis = Some(0);
        assert!(stage.validate(0).is_err());

        stage.window_millis = Some(60_000);
        assert!(stage.validate(0).is_ok());
        assert_eq!(stage.window(), Duration::from_secs(60));

        stage.max_requests = Some(0);
        assert!(stage.validate(0).is_err());
    }

    #[test]
    fn test_rate_limit_key_forms() {
        let mut stage = StageConfig::new("throttle", StageKind::RateLimit);
        assert_eq!(stage.rate_limit_key().unwrap(), RateLimitKeySetting::Address);

        stage.key = Some("principal".to_string());
        assert_eq!(stage.rate_limit_key().unwrap(), RateLimitKeySetting::Principal);

        stage.key = Some("header:X-Client-Id".to_string());
        assert_eq!(
            stage.rate_limit_key().unwrap(),
            RateLimitKeySetting::Header("X-Client-Id".to_string())
        );

        stage.key = Some("header:".to_string());
        assert!(stage.rate_limit_key().is_err());

        stage.key = Some("header:X Client".to_string());
        assert!(stage.rate_limit_key().is_err());

        stage.key = Some("cookie".to_string());
        assert!(stage.rate_limit_key().is_err());
    }

    #[test]
    fn test_content_type_validation() {
        let mut stage = StageConfig::new("json", StageKind::ContentType);
        assert!(stage.validate(0).is_err());

        stage.allowed_types = vec!["json".to_string()];
        assert!(stage.validate(0).is_err());

        stage.allowed_types = vec!["application/json".to_string()];
        assert!(stage.validate(0).is_ok());
    }

    #[test]
    fn test_path_shape() {
        let mut stage = StageConfig::new("log", StageKind::Logging);
        stage.paths = vec!["api/**".to_string()];
        assert!(stage.validate(0).is_err());

        stage.paths.clear();
        assert!(stage.validate(0).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut stage = StageConfig::new("log", StageKind::Logging);
        stage.timeout_ms = Some(0);
        assert!(stage.validate(0).is_err());
        stage.timeout_ms = Some(250);
        assert_eq!(stage.timeout(), Some(Duration::from_millis(250)));
    }
}
