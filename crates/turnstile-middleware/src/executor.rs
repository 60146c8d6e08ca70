//! The chain executor.
//!
//! ```text
//! RequestContext ─▶ resolve(path) ─▶ stage 1 ─▶ stage 2 ─▶ ... ─▶ TerminalHandler
//!                                      │           │
//!                                      ▼           ▼
//!                                 ShortCircuit / Fail ─▶ Response
//! ```
//!
//! The executor is the single place where decisions become responses:
//!
//! - `ShortCircuit` returns the stage's response unchanged (audit log at `debug`)
//! - `Fail` and timeouts become a generic 500 envelope (full cause at `error`)
//! - handler errors are rendered through their category
//!
//! It holds no per-request state, so one executor serves every request
//! concurrently.

use crate::registry::StageRegistry;
use crate::stage::{Decision, Stage, StageFault};
use http::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use turnstile_core::{GateError, RequestContext, Response, ResponseExt, TerminalHandler};
use turnstile_telemetry::metrics::{record_chain_completed, record_stage_decision};

/// Default per-stage deadline.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Executor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Deadline for each stage evaluation. A descriptor's own timeout wins.
    /// `None` disables the deadline.
    pub stage_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            stage_timeout: Some(DEFAULT_STAGE_TIMEOUT),
        }
    }
}

/// Where a request is in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Evaluating the stage at this index of the resolved chain.
    Evaluating(usize),
    /// A stage returned a response.
    ShortCircuited,
    /// A stage faulted or timed out, or the handler failed internally.
    Failed,
    /// Every stage continued; the handler is running.
    Dispatched,
    /// The handler produced a response.
    Completed,
    /// The caller cancelled the request.
    Cancelled,
}

impl ChainState {
    /// Returns `true` for states that end the traversal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ShortCircuited | Self::Failed | Self::Completed | Self::Cancelled
        )
    }

    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Evaluating(_) => "evaluating",
            Self::ShortCircuited => "short_circuited",
            Self::Failed => "failed",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Returned by [`ChainExecutor::handle_with_cancellation`] when the token
/// fires before a response is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request cancelled before the chain finished")]
pub struct Cancelled;

/// The full record of one traversal.
#[derive(Debug)]
pub struct ChainOutcome {
    /// The response to send.
    ///
    /// For [`ChainState::Cancelled`] this is a 503 placeholder nobody waits for.
    pub response: Response,
    /// The terminal state.
    pub state: ChainState,
    /// Names of the stages that were invoked, in order.
    pub invoked: Vec<String>,
    /// The stage that ended the chain early, if any.
    pub halted_by: Option<String>,
    /// The context as the chain left it.
    pub context: RequestContext,
}

struct Traversal {
    response: Response,
    state: ChainState,
    invoked: Vec<String>,
    halted_by: Option<String>,
}

/// Runs the applicable stages for each request, then the terminal handler.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use http::StatusCode;
/// use turnstile_core::{handler_fn, RequestContext, Response, ResponseExt};
/// use turnstile_middleware::{ChainExecutor, StageRegistry};
///
/// # tokio_test::block_on(async {
/// let registry = Arc::new(StageRegistry::new());
/// let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "ok")) });
/// let executor = ChainExecutor::new(registry, Arc::new(handler));
///
/// let response = executor.handle(RequestContext::builder().build()).await;
/// assert_eq!(response.status(), StatusCode::OK);
/// # });
/// ```
#[derive(Clone)]
pub struct ChainExecutor {
    registry: Arc<StageRegistry>,
    handler: Arc<dyn TerminalHandler>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for ChainExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainExecutor")
            .field("stages", &self.registry.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ChainExecutor {
    /// Creates an executor with the default configuration.
    #[must_use]
    pub fn new(registry: Arc<StageRegistry>, handler: Arc<dyn TerminalHandler>) -> Self {
        Self::with_config(registry, handler, ExecutorConfig::default())
    }

    /// Creates an executor with explicit settings.
    #[must_use]
    pub fn with_config(
        registry: Arc<StageRegistry>,
        handler: Arc<dyn TerminalHandler>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            handler,
            config,
        }
    }

    /// Returns the registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs one request through the chain. Never fails: every stage fault
    /// and handler error is translated into a response.
    pub async fn handle(&self, ctx: RequestContext) -> Response {
        self.handle_traced(ctx).await.response
    }

    /// Like [`handle`](Self::handle), but also returns the traversal record.
    pub async fn handle_traced(&self, ctx: RequestContext) -> ChainOutcome {
        self.execute(ctx, None).await
    }

    /// Runs the chain until it finishes or `token` is cancelled.
    ///
    /// The token is checked before each stage, and every stage and handler
    /// future is raced against it. On cancellation no further stage runs.
    pub async fn handle_with_cancellation(
        &self,
        ctx: RequestContext,
        token: CancellationToken,
    ) -> Result<Response, Cancelled> {
        let outcome = self.execute(ctx, Some(&token)).await;
        match outcome.state {
            ChainState::Cancelled => Err(Cancelled),
            _ => Ok(outcome.response),
        }
    }

    async fn execute(&self, mut ctx: RequestContext, cancel: Option<&CancellationToken>) -> ChainOutcome {
        let span = tracing::info_span!(
            "chain",
            request_id = %ctx.request_id(),
            http.method = %ctx.method(),
            http.path = %ctx.path(),
        );

        let traversal = self.traverse(&mut ctx, cancel).instrument(span).await;

        let elapsed = ctx.elapsed();
        record_chain_completed(traversal.state.label(), elapsed);
        tracing::debug!(
            request_id = %ctx.request_id(),
            http.status_code = traversal.response.status().as_u16(),
            outcome = traversal.state.label(),
            stages = traversal.invoked.len(),
            duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "chain finished"
        );

        ChainOutcome {
            response: traversal.response,
            state: traversal.state,
            invoked: traversal.invoked,
            halted_by: traversal.halted_by,
            context: ctx,
        }
    }

    async fn traverse(&self, ctx: &mut RequestContext, cancel: Option<&CancellationToken>) -> Traversal {
        let chain = self.registry.resolve(ctx.path());
        let mut invoked = Vec::with_capacity(chain.len());

        for (index, descriptor) in chain.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Traversal::cancelled(invoked);
            }

            tracing::trace!(stage = descriptor.name(), state = ?ChainState::Evaluating(index), "evaluating stage");
            invoked.push(descriptor.name().to_string());

            let deadline = descriptor.timeout().or(self.config.stage_timeout);
            let Some(decision) = race(evaluate(descriptor.stage(), ctx, deadline), cancel).await
            else {
                return Traversal::cancelled(invoked);
            };
            record_stage_decision(descriptor.name(), decision.label());

            match decision {
                Decision::Continue => {}
                Decision::ShortCircuit(response) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        stage = descriptor.name(),
                        http.status_code = response.status().as_u16(),
                        "request short-circuited"
                    );
                    return Traversal {
                        response,
                        state: ChainState::ShortCircuited,
                        invoked,
                        halted_by: Some(descriptor.name().to_string()),
                    };
                }
                Decision::Fail(fault) => {
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        stage = descriptor.name(),
                        http.method = %ctx.method(),
                        http.path = %ctx.path(),
                        error = %fault,
                        cause = ?fault,
                        "stage failed"
                    );
                    let error = GateError::from(fault);
                    return Traversal {
                        response: error.to_response(Some(&ctx.request_id().to_string())),
                        state: ChainState::Failed,
                        invoked,
                        halted_by: Some(descriptor.name().to_string()),
                    };
                }
            }
        }

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Traversal::cancelled(invoked);
        }

        tracing::trace!(state = ?ChainState::Dispatched, "dispatching to handler");
        let Some(result) = race(self.handler.call(ctx), cancel).await else {
            return Traversal::cancelled(invoked);
        };

        let (response, state) = match result {
            Ok(response) => (response, ChainState::Completed),
            Err(error) => {
                let state = if error.category().is_internal() {
                    tracing::error!(
                        request_id = %ctx.request_id(),
                        http.method = %ctx.method(),
                        http.path = %ctx.path(),
                        error = ?error,
                        "handler failed"
                    );
                    ChainState::Failed
                } else {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        error = %error,
                        "handler returned an error"
                    );
                    ChainState::Completed
                };
                (error.to_response(Some(&ctx.request_id().to_string())), state)
            }
        };

        Traversal {
            response,
            state,
            invoked,
            halted_by: None,
        }
    }
}

impl Traversal {
    fn cancelled(invoked: Vec<String>) -> Self {
        tracing::debug!(stages = invoked.len(), "chain cancelled");
        Self {
            response: Response::text(StatusCode::SERVICE_UNAVAILABLE, "Request cancelled"),
            state: ChainState::Cancelled,
            invoked,
            halted_by: None,
        }
    }
}

async fn evaluate(stage: &dyn Stage, ctx: &mut RequestContext, deadline: Option<Duration>) -> Decision {
    let future = stage.evaluate(ctx);
    match deadline {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .unwrap_or_else(|_| Decision::Fail(StageFault::Timeout(limit))),
        None => future.await,
    }
}

async fn race<F: Future>(future: F, cancel: Option<&CancellationToken>) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => None,
            output = future => Some(output),
        },
        None => Some(future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StageDescriptor;
    use crate::stage::stage_fn;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use turnstile_core::{handler_fn, AttachmentKey, BoxFuture};

    const TRAIL: AttachmentKey<Vec<&'static str>> = AttachmentKey::new("trail");

    fn ok_handler() -> Arc<dyn TerminalHandler> {
        Arc::new(handler_fn(|_ctx| async {
            Ok(Response::text(StatusCode::OK, "handled"))
        }))
    }

    fn marker(name: &'static str) -> impl Stage {
        stage_fn(move |ctx| {
            let mut trail = ctx.detach(TRAIL).unwrap_or_default();
            trail.push(name);
            ctx.attach(TRAIL, trail);
            Decision::Continue
        })
    }

    fn register(registry: &StageRegistry, name: &'static str, priority: i32, stage: impl Stage) {
        registry
            .register(
                StageDescriptor::builder(name, stage)
                    .priority(priority)
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    struct SlowStage(Duration);

    impl Stage for SlowStage {
        fn evaluate<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
            Box::pin(async move {
                tokio::time::sleep(self.0).await;
                Decision::Continue
            })
        }
    }

    #[tokio::test]
    async fn test_empty_chain_dispatches() {
        let executor = ChainExecutor::new(Arc::new(StageRegistry::new()), ok_handler());
        let outcome = executor.handle_traced(RequestContext::builder().build()).await;

        assert_eq!(outcome.state, ChainState::Completed);
        assert!(outcome.invoked.is_empty());
        assert_eq!(outcome.response.body_text().await, "handled");
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let registry = Arc::new(StageRegistry::new());
        register(&registry, "late", 50, marker("late"));
        register(&registry, "early", 10, marker("early"));

        let executor = ChainExecutor::new(registry, ok_handler());
        let outcome = executor.handle_traced(RequestContext::builder().build()).await;

        assert_eq!(outcome.invoked, vec!["early", "late"]);
        assert_eq!(outcome.context.attachment(TRAIL), Some(&vec!["early", "late"]));
    }

    #[tokio::test]
    async fn test_short_circuit_stops_chain() {
        let registry = Arc::new(StageRegistry::new());
        register(&registry, "deny", 10, stage_fn(|_| {
            Decision::ShortCircuit(Response::text(StatusCode::FORBIDDEN, "Forbidden"))
        }));
        register(&registry, "after", 20, marker("after"));

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let handler = handler_fn(move |_ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::text(StatusCode::OK, "handled")) }
        });

        let executor = ChainExecutor::new(registry, Arc::new(handler));
        let outcome = executor.handle_traced(RequestContext::builder().build()).await;

        assert_eq!(outcome.state, ChainState::ShortCircuited);
        assert_eq!(outcome.halted_by.as_deref(), Some("deny"));
        assert_eq!(outcome.invoked, vec!["deny"]);
        assert_eq!(outcome.response.status(), StatusCode::FORBIDDEN);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fault_becomes_generic_500() {
        let registry = Arc::new(StageRegistry::new());
        register(&registry, "broken", 10, stage_fn(|_| {
            Decision::Fail(StageFault::internal("credential store password=hunter2 unreachable"))
        }));

        let executor = ChainExecutor::new(registry, ok_handler());
        let outcome = executor.handle_traced(RequestContext::builder().build()).await;

        assert_eq!(outcome.state, ChainState::Failed);
        assert_eq!(outcome.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = outcome.response.body_text().await;
        assert!(body.contains("Internal server error"));
        assert!(!body.contains("hunter2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout() {
        let registry = Arc::new(StageRegistry::new());
        register(&registry, "slow", 10, SlowStage(Duration::from_secs(30)));

        let executor = ChainExecutor::with_config(
            registry,
            ok_handler(),
            ExecutorConfig {
                stage_timeout: Some(Duration::from_millis(100)),
            },
        );
        let outcome = executor.handle_traced(RequestContext::builder().build()).await;

        assert_eq!(outcome.state, ChainState::Failed);
        assert_eq!(outcome.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test(start_paused = true)]
    async fn test_descriptor_timeout_overrides_default() {
        let registry = Arc::new(StageRegistry::new());
        registry
            .register(
                StageDescriptor::builder("slow-but-allowed", SlowStage(Duration::from_secs(8)))
                    .timeout(Duration::from_secs(10))
                    .build()
                    .unwrap(),
            )
            .unwrap();

        let executor = ChainExecutor::new(registry, ok_handler());
        let outcome = executor.handle_traced(RequestContext::builder().build()).await;

        assert_eq!(outcome.state, ChainState::Completed);
    }

    #[tokio::test]
    async fn test_handler_error_translated() {
        let handler = handler_fn(|_ctx| async { Err(GateError::not_found("no such record")) });
        let executor = ChainExecutor::new(Arc::new(StageRegistry::new()), Arc::new(handler));

        let outcome = executor.handle_traced(RequestContext::builder().build()).await;
        assert_eq!(outcome.response.status(), StatusCode::NOT_FOUND);
        assert_eq!(outcome.state, ChainState::Completed);

        let handler = handler_fn(|_ctx| async { Err(GateError::internal("pool exhausted")) });
        let executor = ChainExecutor::new(Arc::new(StageRegistry::new()), Arc::new(handler));

        let outcome = executor.handle_traced(RequestContext::builder().build()).await;
        assert_eq!(outcome.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(outcome.state, ChainState::Failed);
        assert!(!outcome.response.body_text().await.contains("pool"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let registry = Arc::new(StageRegistry::new());
        register(&registry, "a", 10, marker("a"));

        let executor = ChainExecutor::new(registry, ok_handler());
        let token = CancellationToken::new();
        token.cancel();

        let result = executor
            .handle_with_cancellation(RequestContext::builder().build(), token)
            .await;
        assert_eq!(result.unwrap_err(), Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_mid_stage() {
        let registry = Arc::new(StageRegistry::new());
        register(&registry, "slow", 10, SlowStage(Duration::from_secs(3)));
        register(&registry, "after", 20, marker("after"));

        let executor = ChainExecutor::new(registry, ok_handler());
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = executor
            .handle_with_cancellation(RequestContext::builder().build(), token)
            .await;
        assert_eq!(result.unwrap_err(), Cancelled);
    }

    #[tokio::test]
    async fn test_uncancelled_token_completes() {
        let executor = ChainExecutor::new(Arc::new(StageRegistry::new()), ok_handler());
        let response = executor
            .handle_with_cancellation(RequestContext::builder().build(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_chain_state_labels() {
        assert!(ChainState::Completed.is_terminal());
        assert!(!ChainState::Evaluating(0).is_terminal());
        assert!(!ChainState::Dispatched.is_terminal());
        assert_eq!(ChainState::ShortCircuited.label(), "short_circuited");
    }

    #[test]
    fn test_default_config() {
        assert_eq!(
            ExecutorConfig::default().stage_timeout,
            Some(Duration::from_secs(5))
        );
    }
}
