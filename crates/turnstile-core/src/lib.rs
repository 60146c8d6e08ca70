//! # Turnstile Core
//!
//! Core types shared by every Turnstile crate.
//!
//! This crate provides the foundational types the middleware chain is built on:
//!
//! - [`RequestContext`] - Per-request carrier of inbound data plus typed attachments
//! - [`RequestId`] - UUID v7 request identifier
//! - [`AttachmentKey`] / [`Attachments`] - Typed cross-stage hand-off slots
//! - [`Principal`] - Authenticated caller attached by an authentication stage
//! - [`GateError`] - Standard error taxonomy with HTTP status mapping
//! - [`TerminalHandler`] - The business-logic endpoint at the end of the chain

#![doc(html_root_url = "https://docs.rs/turnstile-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod attachment;
mod context;
mod error;
mod handler;
mod principal;
pub mod types;

pub use attachment::{AttachmentKey, Attachments};
pub use context::{RequestContext, RequestContextBuilder, RequestId};
pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, GateError, GateResult};
pub use handler::{handler_fn, BoxFuture, FnHandler, TerminalHandler};
pub use principal::{Principal, PRINCIPAL};
pub use types::{Request, Response, ResponseExt};
