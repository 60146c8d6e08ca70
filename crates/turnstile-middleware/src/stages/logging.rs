//! Request logging.
//!
//! A read-only stage that records every request it sees and always continues.
//! Response status and timing are logged by the executor when the chain
//! finishes, under the same `request_id`.

use crate::stage::{Decision, Stage};
use tracing::Level;
use turnstile_core::{BoxFuture, RequestContext};

/// Logs method, path, and request id of each request.
///
/// # Example
///
/// ```
/// use turnstile_middleware::stages::LoggingStage;
/// use tracing::Level;
///
/// let stage = LoggingStage::new().level(Level::DEBUG).with_user_agent(true);
/// # let _ = stage;
/// ```
#[derive(Debug, Clone)]
pub struct LoggingStage {
    level: Level,
    user_agent: bool,
}

impl LoggingStage {
    /// Logs at `INFO` without the user agent.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            level: Level::INFO,
            user_agent: false,
        }
    }

    /// Sets the log level.
    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Also records the `User-Agent` header.
    #[must_use]
    pub const fn with_user_agent(mut self, enabled: bool) -> Self {
        self.user_agent = enabled;
        self
    }
}

impl Default for LoggingStage {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! incoming {
    ($level:expr, $ctx:expr, $agent:expr) => {
        tracing::event!(
            $level,
            request_id = %$ctx.request_id(),
            http.method = %$ctx.method(),
            http.path = %$ctx.path(),
            user_agent = $agent,
            "Incoming request"
        )
    };
}

impl Stage for LoggingStage {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
        let agent = if self.user_agent {
            ctx.header("user-agent")
        } else {
            None
        };

        match self.level {
            Level::TRACE => incoming!(Level::TRACE, ctx, agent),
            Level::DEBUG => incoming!(Level::DEBUG, ctx, agent),
            Level::INFO => incoming!(Level::INFO, ctx, agent),
            Level::WARN => incoming!(Level::WARN, ctx, agent),
            _ => incoming!(Level::ERROR, ctx, agent),
        }

        Box::pin(async { Decision::Continue })
    }
}
