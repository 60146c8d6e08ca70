//! A configured chain ready to serve requests.

use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use turnstile_config::TurnstileConfig;
use turnstile_core::{Request, RequestContext, Response, TerminalHandler};
use turnstile_middleware::{Cancelled, ChainExecutor, ChainOutcome, ExecutorConfig, StageRegistry};

use crate::bootstrap::StageFactory;
use crate::error::BootstrapResult;

/// A frozen stage registry and a terminal handler behind one executor.
///
/// Cloning is cheap; clones share stages and rate-limit counters.
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use turnstile::prelude::*;
///
/// # tokio_test::block_on(async {
/// let config = ConfigLoader::new()
///     .with_string(r#"
///         [[stages]]
///         name = "api-key"
///         kind = "api_key"
///         paths = ["/api/**"]
///         keys = ["my-secret-key"]
///     "#, "toml")
///     .unwrap()
///     .load()
///     .unwrap();
///
/// let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "Here is your data!")) });
/// let gateway = Gateway::from_config(&config, handler).unwrap();
///
/// let response = gateway.handle_context(RequestContext::builder().path("/api/data").build()).await;
/// assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
/// # });
/// ```
#[derive(Clone)]
pub struct Gateway {
    executor: ChainExecutor,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("stages", &self.executor.registry().names())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Builds every configured stage and freezes the registry.
    ///
    /// # Errors
    ///
    /// Any configuration fault. Nothing is served when this fails.
    pub fn from_config(
        config: &TurnstileConfig,
        handler: impl TerminalHandler,
    ) -> BootstrapResult<Self> {
        Self::from_config_with(config, Arc::new(handler), &StageFactory::new())
    }

    /// Like [`from_config`](Self::from_config) with a custom stage factory.
    ///
    /// # Errors
    ///
    /// Any configuration fault.
    pub fn from_config_with(
        config: &TurnstileConfig,
        handler: Arc<dyn TerminalHandler>,
        factory: &StageFactory,
    ) -> BootstrapResult<Self> {
        config.validate()?;
        let registry = factory.build_registry(&config.stages)?;
        registry.freeze();

        let executor_config = ExecutorConfig {
            stage_timeout: config.executor.stage_timeout(),
        };

        tracing::info!(
            stages = registry.len(),
            stage_timeout_ms = config.executor.stage_timeout_ms,
            "gateway assembled"
        );

        Ok(Self::from_registry(Arc::new(registry), handler, executor_config))
    }

    /// Wraps a registry assembled by hand.
    #[must_use]
    pub fn from_registry(
        registry: Arc<StageRegistry>,
        handler: Arc<dyn TerminalHandler>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            executor: ChainExecutor::with_config(registry, handler, config),
        }
    }

    /// Buffers `request`, runs the chain, and returns the response.
    pub async fn handle(&self, request: Request, remote_addr: Option<IpAddr>) -> Response {
        let ctx = RequestContext::from_request(request, remote_addr).await;
        self.executor.handle(ctx).await
    }

    /// Runs the chain for an already-built context.
    pub async fn handle_context(&self, ctx: RequestContext) -> Response {
        self.executor.handle(ctx).await
    }

    /// Runs the chain and reports which stages ran.
    pub async fn handle_traced(&self, ctx: RequestContext) -> ChainOutcome {
        self.executor.handle_traced(ctx).await
    }

    /// Runs the chain unless `token` is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if the caller went away mid-chain.
    pub async fn handle_with_cancellation(
        &self,
        ctx: RequestContext,
        token: CancellationToken,
    ) -> Result<Response, Cancelled> {
        self.executor.handle_with_cancellation(ctx, token).await
    }

    /// Names of the registered stages in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.executor.registry().names()
    }

    /// The underlying executor.
    #[must_use]
    pub const fn executor(&self) -> &ChainExecutor {
        &self.executor
    }
}

/// Installs logging from the configuration's `[logging]` section.
///
/// # Errors
///
/// Fails if the level directive is malformed or a subscriber is already set.
pub fn init_logging(config: &TurnstileConfig) -> BootstrapResult<()> {
    turnstile_telemetry::init_logging(&config.logging.to_log_config())?;
    Ok(())
}
