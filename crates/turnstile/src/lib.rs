//! # Turnstile
//!
//! **A configurable request-processing middleware chain**
//!
//! Turnstile puts an ordered, path-scoped chain of stages in front of a
//! terminal handler. Each stage inspects the request and either lets it
//! through or answers it on the spot:
//!
//! - 🔑 **Authentication** – API keys and bearer tokens (401)
//! - 🛡️ **Access control** – client address allow-lists (403)
//! - ⏱️ **Rate limiting** – fixed windows per address, principal or header (429)
//! - 📄 **Content-Type enforcement** – media-type allow-lists (415)
//! - 📊 **Request logging** – structured `tracing` events
//!
//! ## Quick Start
//!
//! ```no_run
//! use http::StatusCode;
//! use turnstile::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::new()
//!     .with_dotenv()?
//!     .with_file("gateway.toml")?
//!     .with_env_prefix("TURNSTILE")
//!     .load()?;
//! turnstile::init_logging(&config)?;
//!
//! let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "Here is your data!")) });
//! let gateway = Gateway::from_config(&config, handler)?;
//!
//! let request = http::Request::builder()
//!     .uri("/api/data")
//!     .header("X-API-KEY", "my-secret-key")
//!     .body(Default::default())?;
//! let response = gateway.handle(request, Some("10.0.0.1".parse()?)).await;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → resolve(path) → [stage]* → TerminalHandler
//!                              │
//!                              └── ShortCircuit / Fail ──→ Response
//! ```
//!
//! Stages run in `(priority, declaration order)`; only stages whose path
//! patterns match take part.

#![doc(html_root_url = "https://docs.rs/turnstile/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bootstrap;
mod error;
mod gateway;

pub use bootstrap::{build_registry, StageFactory};
pub use error::{BootstrapError, BootstrapResult};
pub use gateway::{init_logging, Gateway};

// Re-export core types
pub use turnstile_core as core;

// Re-export the chain and reference stages
pub use turnstile_middleware as middleware;

// Re-export configuration types
pub use turnstile_config as config;

// Re-export logging and metrics setup
pub use turnstile_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```
/// use turnstile::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{BootstrapError, Gateway, StageFactory};

    pub use turnstile_core::{
        handler_fn, AttachmentKey, GateError, GateResult, Principal, RequestContext, RequestId,
        Response, ResponseExt, TerminalHandler, PRINCIPAL,
    };

    pub use turnstile_middleware::{
        stage_fn, CancellationToken, ChainExecutor, Decision, Stage, StageDescriptor,
        StageFault, StageRegistry,
    };

    pub use turnstile_middleware::stages::{
        AccessStage, AuthenticationStage, ContentTypeStage, LoggingStage, RateLimitStage,
        StaticCredentials,
    };

    pub use turnstile_config::{ConfigLoader, StageConfig, StageKind, TurnstileConfig};
}
