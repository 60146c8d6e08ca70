//! Terminal handler contract.
//!
//! The [`TerminalHandler`] is the business-logic endpoint the executor
//! dispatches to once every applicable stage has continued. It is an external
//! collaborator: the chain only needs it to turn a context into a response.

use crate::context::RequestContext;
use crate::error::GateResult;
use crate::types::Response;
use std::future::Future;
use std::pin::Pin;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The endpoint invoked at the end of a fully-continued chain.
///
/// Errors returned here are translated by the executor into responses, the
/// same way stage faults are.
///
/// # Example
///
/// ```
/// use turnstile_core::{BoxFuture, GateResult, RequestContext, Response, ResponseExt, TerminalHandler};
/// use http::StatusCode;
///
/// struct DataHandler;
///
/// impl TerminalHandler for DataHandler {
///     fn call<'a>(&'a self, _ctx: &'a RequestContext) -> BoxFuture<'a, GateResult<Response>> {
///         Box::pin(async { Ok(Response::text(StatusCode::OK, "Here is your data!")) })
///     }
/// }
/// ```
pub trait TerminalHandler: Send + Sync + 'static {
    /// Produces the response for a request that passed every stage.
    fn call<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, GateResult<Response>>;
}

/// A handler built from a closure.
///
/// The closure runs synchronously against the context and returns a future
/// that owns whatever it needs, so it can read attachments before going async.
pub struct FnHandler<F> {
    func: F,
}

impl<F> FnHandler<F> {
    /// Creates a new function-based handler.
    #[must_use]
    pub const fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F, Fut> TerminalHandler for FnHandler<F>
where
    F: Fn(&RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GateResult<Response>> + Send + 'static,
{
    fn call<'a>(&'a self, ctx: &'a RequestContext) -> BoxFuture<'a, GateResult<Response>> {
        Box::pin((self.func)(ctx))
    }
}

/// Wraps a closure as a [`TerminalHandler`].
///
/// # Example
///
/// ```
/// use turnstile_core::{handler_fn, Response, ResponseExt};
/// use http::StatusCode;
///
/// let handler = handler_fn(|ctx| {
///     let agent = ctx.header("user-agent").unwrap_or("unknown").to_string();
///     async move { Ok(Response::text(StatusCode::OK, format!("Your User-Agent is: {agent}"))) }
/// });
/// # let _ = handler;
/// ```
pub const fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(&RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GateResult<Response>> + Send + 'static,
{
    FnHandler::new(func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use crate::principal::{Principal, PRINCIPAL};
    use crate::types::ResponseExt;
    use http::StatusCode;

    struct DataHandler;

    impl TerminalHandler for DataHandler {
        fn call<'a>(&'a self, _ctx: &'a RequestContext) -> BoxFuture<'a, GateResult<Response>> {
            Box::pin(async { Ok(Response::text(StatusCode::OK, "Here is your data!")) })
        }
    }

    #[tokio::test]
    async fn test_trait_handler() {
        let ctx = RequestContext::builder().path("/api/data").build();
        let response = DataHandler.call(&ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_text().await, "Here is your data!");
    }

    #[tokio::test]
    async fn test_fn_handler_reads_attachments() {
        let handler = handler_fn(|ctx| {
            let who = ctx.principal().map(Principal::log_id);
            async move {
                match who {
                    Some(id) => Ok(Response::text(StatusCode::OK, id)),
                    None => Err(GateError::authentication("no principal")),
                }
            }
        });

        let mut ctx = RequestContext::builder().build();
        assert!(handler.call(&ctx).await.is_err());

        ctx.attach(PRINCIPAL, Principal::api_key("k9"));
        let response = handler.call(&ctx).await.unwrap();
        assert_eq!(response.body_text().await, "apikey:k9");
    }

    #[test]
    fn test_handler_is_object_safe() {
        let handler: Box<dyn TerminalHandler> = Box::new(DataHandler);
        let _ = handler;
    }
}
