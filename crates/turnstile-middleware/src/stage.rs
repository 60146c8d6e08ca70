//! The stage contract.
//!
//! A [`Stage`] inspects the [`RequestContext`] and returns a [`Decision`]. It
//! never calls the next stage itself; the executor owns the traversal, so a
//! stage cannot forget to continue or continue twice.
//!
//! # Example
//!
//! ```
//! use turnstile_middleware::{BoxFuture, Decision, RequestContext, Stage};
//! use turnstile_core::{Response, ResponseExt};
//! use http::StatusCode;
//!
//! struct MaintenanceStage;
//!
//! impl Stage for MaintenanceStage {
//!     fn evaluate<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
//!         Box::pin(async {
//!             Decision::ShortCircuit(Response::text(StatusCode::SERVICE_UNAVAILABLE, "Down for maintenance"))
//!         })
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use turnstile_core::{BoxFuture, GateError, RequestContext, Response};

/// A unit of middleware logic.
///
/// Stages are shared across concurrent requests, so any state they keep must
/// be synchronized internally.
pub trait Stage: Send + Sync + 'static {
    /// Inspects the request and decides how the chain proceeds.
    ///
    /// Only the context's attachments may be written.
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision>;
}

/// The outcome of one stage evaluation.
#[derive(Debug)]
pub enum Decision {
    /// Proceed to the next stage, or to the terminal handler if none remain.
    Continue,
    /// Stop the chain and return this response.
    ShortCircuit(Response),
    /// The stage could not reach a decision.
    Fail(StageFault),
}

impl Decision {
    /// Converts a deliberate denial into a short-circuit response.
    ///
    /// Internal and timeout categories become [`Decision::Fail`] instead, so
    /// that their detail never reaches the client.
    #[must_use]
    pub fn reject(error: GateError) -> Self {
        if error.category().is_internal() {
            Self::Fail(StageFault::from(error))
        } else {
            Self::ShortCircuit(error.to_response(None))
        }
    }

    /// Returns `true` for [`Decision::Continue`].
    #[must_use]
    pub const fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Continue => turnstile_telemetry::metrics::DECISION_CONTINUE,
            Self::ShortCircuit(_) => turnstile_telemetry::metrics::DECISION_SHORT_CIRCUIT,
            Self::Fail(_) => turnstile_telemetry::metrics::DECISION_FAIL,
        }
    }
}

/// An unexpected stage failure.
///
/// Faults are logged in full and answered with a generic 500.
#[derive(Debug, Error)]
pub enum StageFault {
    /// The stage hit an error it could not recover from.
    #[error("{message}")]
    Internal {
        /// What went wrong.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The stage did not decide within its deadline.
    #[error("stage did not decide within {0:?}")]
    Timeout(Duration),
}

impl StageFault {
    /// Creates an internal fault.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal fault with an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns `true` if the fault is a deadline overrun.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<GateError> for StageFault {
    fn from(error: GateError) -> Self {
        Self::with_source("stage returned an error", error)
    }
}

impl From<StageFault> for GateError {
    fn from(fault: StageFault) -> Self {
        match fault {
            StageFault::Timeout(after) => {
                Self::timeout(format!("stage did not decide within {after:?}"))
            }
            StageFault::Internal { message, source } => match source {
                Some(source) => Self::internal_with_source(message, source),
                None => Self::internal(message),
            },
        }
    }
}

/// A stage built from a synchronous closure.
///
/// Useful for small checks that need no I/O.
///
/// # Example
///
/// ```
/// use turnstile_middleware::{stage_fn, Decision};
///
/// let stage = stage_fn(|ctx| {
///     if ctx.header("x-debug").is_some() {
///         tracing::debug!(path = ctx.path(), "debug header present");
///     }
///     Decision::Continue
/// });
/// # let _ = stage;
/// ```
pub struct FnStage<F> {
    func: F,
}

impl<F> FnStage<F> {
    /// Creates a new function-based stage.
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage").finish_non_exhaustive()
    }
}

impl<F> Stage for FnStage<F>
where
    F: Fn(&mut RequestContext) -> Decision + Send + Sync + 'static,
{
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
        let decision = (self.func)(ctx);
        Box::pin(async move { decision })
    }
}

/// Wraps a synchronous closure as a [`Stage`].
pub const fn stage_fn<F>(func: F) -> FnStage<F>
where
    F: Fn(&mut RequestContext) -> Decision + Send + Sync + 'static,
{
    FnStage::new(func)
}
