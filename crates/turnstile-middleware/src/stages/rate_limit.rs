//! Rate limiting.
//!
//! Counts requests per client key in fixed windows and answers `429 Too Many
//! Requests` once a key exceeds its limit.
//!
//! ## Keys
//!
//! - **Per-address**: the connected peer (or first `X-Forwarded-For` hop)
//! - **Per-principal**: the authenticated caller, falling back to the address
//! - **Per-header**: any header value, e.g. an API key
//! - **Global**: one counter for every request
//!
//! ## Algorithm
//!
//! Fixed window anchored at each key's first request:
//!
//! - the window opens when a key is first seen
//! - requests `1..=limit` inside the window continue
//! - further requests are rejected until the window has fully elapsed
//! - the next request after that opens a new window
//!
//! Counters live in a [`RateLimitStore`] that the stage owns through an `Arc`,
//! so several stages or a background purge task can share one store. The
//! store also drops closed windows on its own every
//! [`DEFAULT_SWEEP_INTERVAL`] checks, so one-off clients do not pile up.
//!
//! ## Example
//!
//! ```
//! use turnstile_middleware::stages::RateLimitStage;
//! use std::time::Duration;
//!
//! let stage = RateLimitStage::builder()
//!     .limit(10)
//!     .window(Duration::from_secs(60))
//!     .per_address()
//!     .build();
//! assert_eq!(stage.config().limit(), 10);
//! ```

use crate::stage::{Decision, Stage};
use crate::stages::access::forwarded_client;
use dashmap::DashMap;
use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use turnstile_core::{AttachmentKey, BoxFuture, RequestContext, Response, ResponseExt};

/// Attachment slot holding the caller's [`RateLimitInfo`].
pub const RATE_LIMIT: AttachmentKey<RateLimitInfo> = AttachmentKey::new("rate_limit");

/// Checks between automatic sweeps of closed windows.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 1024;

/// Rate limit header names.
pub mod headers {
    /// Maximum requests allowed in the window.
    pub const LIMIT: &str = "x-ratelimit-limit";
    /// Remaining requests in current window.
    pub const REMAINING: &str = "x-ratelimit-remaining";
    /// Seconds until the window resets.
    pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
    /// Seconds to wait before retrying (on 429).
    pub const RETRY_AFTER: &str = "retry-after";
}

/// Source of the current time for window bookkeeping.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// # Example
///
/// ```
/// use turnstile_middleware::stages::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(61));
/// assert_eq!(clock.now() - start, Duration::from_secs(61));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

/// What the stage tells later stages about the caller's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed per window.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// Time until the current window closes.
    pub reset_in: Duration,
}

/// Result of one counter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is within budget and was counted.
    Allowed(RateLimitInfo),
    /// Request is over budget and was not counted.
    Limited {
        /// Requests allowed per window.
        limit: u64,
        /// Time until the window closes.
        retry_after: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    opened_at: Instant,
    length: Duration,
}

impl Window {
    fn is_closed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.opened_at) >= self.length
    }
}

/// Shared counter storage.
///
/// Each check holds the key's map entry for the whole read-compare-increment,
/// so concurrent requests for one key are never lost or double-admitted.
pub struct RateLimitStore {
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
    checks: AtomicU64,
    sweep_interval: u64,
}

impl RateLimitStore {
    /// Creates a store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store on the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            checks: AtomicU64::new(0),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Sweeps closed windows every `interval` checks. `0` turns sweeping off.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Counts one request for `key` if it fits in the budget.
    pub fn check(&self, key: &str, limit: u64, window: Duration) -> RateLimitResult {
        let now = self.clock.now();
        let result = {
            let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
                count: 0,
                opened_at: now,
                length: window,
            });

            if entry.is_closed(now) {
                entry.count = 0;
                entry.opened_at = now;
            }
            entry.length = window;

            let reset_in = window.saturating_sub(now.saturating_duration_since(entry.opened_at));
            if entry.count >= limit {
                RateLimitResult::Limited {
                    limit,
                    retry_after: reset_in,
                }
            } else {
                entry.count += 1;
                RateLimitResult::Allowed(RateLimitInfo {
                    limit,
                    remaining: limit - entry.count,
                    reset_in,
                })
            }
        };

        // The entry guard is released above; sweeping takes every shard lock.
        if self.sweep_interval > 0 {
            let checks = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
            if checks % self.sweep_interval == 0 {
                let purged = self.purge_expired();
                if purged > 0 {
                    tracing::trace!(purged, remaining = self.windows.len(), "swept rate limit windows");
                }
            }
        }

        result
    }

    /// Drops every key whose window has closed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_closed(now));
        before.saturating_sub(self.windows.len())
    }

    /// Returns the number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns `true` if no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

impl Default for RateLimitStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateLimitStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitStore")
            .field("keys", &self.windows.len())
            .finish_non_exhaustive()
    }
}

/// How to derive the counter key from a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RateLimitKey {
    /// The client address.
    #[default]
    Address,
    /// The authenticated principal, or the address if none.
    Principal,
    /// A header value. Requests without the header are not limited.
    Header(String),
    /// One counter for every request.
    Global,
}

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    limit: u64,
    window: Duration,
    key: RateLimitKey,
    trust_forwarded: bool,
    error_message: String,
}

impl RateLimitConfig {
    /// Returns the per-window request limit.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Returns the window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Returns the key strategy.
    #[must_use]
    pub const fn key(&self) -> &RateLimitKey {
        &self.key
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            key: RateLimitKey::default(),
            trust_forwarded: false,
            error_message: "Too many requests. Please try again later.".to_string(),
        }
    }
}

/// Builder for [`RateLimitStage`].
#[derive(Debug, Default)]
pub struct RateLimitBuilder {
    config: RateLimitConfig,
    store: Option<Arc<RateLimitStore>>,
}

impl RateLimitBuilder {
    /// Creates a new rate limit builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of requests allowed per window.
    ///
    /// Default: 100 requests.
    #[must_use]
    pub const fn limit(mut self, limit: u64) -> Self {
        self.config.limit = limit;
        self
    }

    /// Sets the window length.
    ///
    /// Default: 60 seconds.
    #[must_use]
    pub const fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    /// Keys counters by client address.
    #[must_use]
    pub fn per_address(self) -> Self {
        self.key(RateLimitKey::Address)
    }

    /// Keys counters by authenticated principal.
    #[must_use]
    pub fn per_principal(self) -> Self {
        self.key(RateLimitKey::Principal)
    }

    /// Keys counters by a header value.
    #[must_use]
    pub fn per_header(self, header_name: impl Into<String>) -> Self {
        self.key(RateLimitKey::Header(header_name.into()))
    }

    /// Uses a single counter for all requests.
    #[must_use]
    pub fn global(self) -> Self {
        self.key(RateLimitKey::Global)
    }

    /// Sets the key strategy.
    #[must_use]
    pub fn key(mut self, key: RateLimitKey) -> Self {
        self.config.key = key;
        self
    }

    /// Reads the client address from `X-Forwarded-For` when keying by address.
    #[must_use]
    pub const fn trust_forwarded(mut self, trust: bool) -> Self {
        self.config.trust_forwarded = trust;
        self
    }

    /// Sets the message returned when rate limited.
    #[must_use]
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.config.error_message = message.into();
        self
    }

    /// Uses a shared counter store instead of a private one.
    #[must_use]
    pub fn store(mut self, store: Arc<RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Builds the stage.
    #[must_use]
    pub fn build(self) -> RateLimitStage {
        RateLimitStage {
            config: self.config,
            store: self.store.unwrap_or_default(),
        }
    }
}

/// Rejects requests over a per-key budget with `429`.
///
/// On success it attaches [`RateLimitInfo`] under [`RATE_LIMIT`].
#[derive(Debug, Clone)]
pub struct RateLimitStage {
    config: RateLimitConfig,
    store: Arc<RateLimitStore>,
}

impl RateLimitStage {
    /// Creates a new rate limit builder.
    #[must_use]
    pub fn builder() -> RateLimitBuilder {
        RateLimitBuilder::new()
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Returns the counter store.
    #[must_use]
    pub const fn store(&self) -> &Arc<RateLimitStore> {
        &self.store
    }

    /// Drops counters whose window has closed.
    pub fn purge_expired(&self) -> usize {
        self.store.purge_expired()
    }

    fn extract_key(&self, ctx: &RequestContext) -> Option<String> {
        let address = || {
            let client = if self.config.trust_forwarded {
                forwarded_client(ctx).or_else(|| ctx.remote_addr())
            } else {
                ctx.remote_addr()
            };
            client.map_or_else(|| "addr:unknown".to_string(), |ip| format!("addr:{ip}"))
        };

        match &self.config.key {
            RateLimitKey::Address => Some(address()),
            RateLimitKey::Principal => Some(
                ctx.principal()
                    .map_or_else(address, |p| format!("principal:{}", p.log_id())),
            ),
            RateLimitKey::Header(name) => ctx.header(name).map(|v| format!("header:{v}")),
            RateLimitKey::Global => Some("global".to_string()),
        }
    }

    fn too_many_requests(&self, limit: u64, retry_after: Duration) -> Response {
        let retry_secs = retry_after_seconds(retry_after);
        let mut response = Response::json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            &self.config.error_message,
        );
        let headers = response.headers_mut();
        headers.insert(headers::LIMIT, HeaderValue::from(limit));
        headers.insert(headers::REMAINING, HeaderValue::from(0_u64));
        headers.insert(headers::RESET_AFTER, HeaderValue::from(retry_secs));
        headers.insert(headers::RETRY_AFTER, HeaderValue::from(retry_secs));
        response
    }
}

// Whole seconds, rounded up, never zero.
fn retry_after_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl Stage for RateLimitStage {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
        let decision = match self.extract_key(ctx) {
            None => Decision::Continue,
            Some(key) => match self.store.check(&key, self.config.limit, self.config.window) {
                RateLimitResult::Allowed(info) => {
                    ctx.attach(RATE_LIMIT, info);
                    Decision::Continue
                }
                RateLimitResult::Limited { limit, retry_after } => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        key = %key,
                        limit,
                        retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                        "rate limit exceeded"
                    );
                    Decision::ShortCircuit(self.too_many_requests(limit, retry_after))
                }
            },
        };
        Box::pin(async move { decision })
    }
}
