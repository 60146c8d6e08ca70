//! # Turnstile Middleware
//!
//! Registers middleware stages, orders them, and runs them in front of a
//! terminal handler.
//!
//! ```text
//! Request → [stage 1] → [stage 2] → ... → [stage n] → TerminalHandler
//!               │            │                 │
//!               └────────────┴── ShortCircuit ─┴──→ Response
//! ```
//!
//! ## Pieces
//!
//! | Type              | Role                                                 |
//! |-------------------|------------------------------------------------------|
//! | [`Stage`]         | Inspects a request, returns a [`Decision`]           |
//! | [`PathPredicate`] | Decides which paths a stage applies to               |
//! | [`StageRegistry`] | Holds descriptors sorted by `(priority, sequence)`   |
//! | [`ChainExecutor`] | Resolves the chain per request and interprets decisions |
//!
//! Stages never call each other. The executor invokes them one at a time on a
//! single `&mut RequestContext`, so a stage only sees attachments written by
//! stages that already ran.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use http::StatusCode;
//! use turnstile_core::{handler_fn, RequestContext, Response, ResponseExt};
//! use turnstile_middleware::stages::{AuthenticationStage, StaticCredentials};
//! use turnstile_middleware::{ChainExecutor, StageDescriptor, StageRegistry};
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(StageRegistry::new());
//! registry
//!     .register(
//!         StageDescriptor::builder(
//!             "api-key",
//!             AuthenticationStage::api_key("X-API-KEY", StaticCredentials::api_keys(["my-secret-key"])),
//!         )
//!         .path("/api/**")
//!         .priority(10)
//!         .build()
//!         .unwrap(),
//!     )
//!     .unwrap();
//!
//! let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "Here is your data!")) });
//! let executor = ChainExecutor::new(registry, Arc::new(handler));
//!
//! let denied = executor.handle(RequestContext::builder().path("/api/data").build()).await;
//! assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
//! # });
//! ```

#![doc(html_root_url = "https://docs.rs/turnstile-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod executor;
pub mod predicate;
pub mod registry;
pub mod stage;
pub mod stages;

// Re-export main types at crate root
pub use executor::{
    Cancelled, ChainExecutor, ChainOutcome, ChainState, ExecutorConfig, DEFAULT_STAGE_TIMEOUT,
};
pub use predicate::{PathPredicate, PredicateError};
pub use registry::{
    RegistryError, RegistrySnapshot, ResolvedChain, StageDescriptor, StageDescriptorBuilder,
    StageRegistry, DEFAULT_PRIORITY,
};
pub use stage::{stage_fn, Decision, FnStage, Stage, StageFault};
pub use turnstile_core::{BoxFuture, RequestContext};
pub use tokio_util::sync::CancellationToken;
