//! Content-Type enforcement.
//!
//! Answers `415 Unsupported Media Type` when the request's media type is not
//! on the allow-list. Parameters such as `charset` are ignored and matching
//! is case-insensitive, so `Application/JSON; charset=utf-8` is
//! `application/json`. Entries of the form `type/*` accept any subtype.

use crate::stage::{Decision, Stage};
use http::{header, Method, StatusCode};
use turnstile_core::{BoxFuture, RequestContext, Response, ResponseExt};

/// Default 415 body.
pub const DEFAULT_UNSUPPORTED_BODY: &str = "Unsupported Media Type";

/// Rejects requests whose `Content-Type` is not allowed.
///
/// # Example
///
/// ```
/// use turnstile_middleware::stages::ContentTypeStage;
///
/// let stage = ContentTypeStage::new(["application/json"]).require(true);
/// assert!(stage.is_allowed("application/json; charset=utf-8"));
/// assert!(!stage.is_allowed("text/plain"));
/// ```
#[derive(Debug, Clone)]
pub struct ContentTypeStage {
    allowed: Vec<String>,
    require: bool,
    methods: Option<Vec<Method>>,
    unsupported_body: String,
}

impl ContentTypeStage {
    /// Creates a stage accepting the given media types.
    ///
    /// Requests without a `Content-Type` pass unless [`require`](Self::require)
    /// is set.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .collect(),
            require: false,
            methods: None,
            unsupported_body: DEFAULT_UNSUPPORTED_BODY.to_string(),
        }
    }

    /// Rejects requests that carry no `Content-Type`.
    #[must_use]
    pub const fn require(mut self, require: bool) -> Self {
        self.require = require;
        self
    }

    /// Only checks requests using one of `methods`.
    #[must_use]
    pub fn only_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    /// Only checks methods that usually carry a body.
    #[must_use]
    pub fn body_methods_only(self) -> Self {
        self.only_methods([Method::POST, Method::PUT, Method::PATCH])
    }

    /// Replaces the 415 body.
    #[must_use]
    pub fn with_unsupported_body(mut self, body: impl Into<String>) -> Self {
        self.unsupported_body = body.into();
        self
    }

    /// Returns `true` if a `Content-Type` header value is acceptable.
    #[must_use]
    pub fn is_allowed(&self, content_type: &str) -> bool {
        let media = media_type(content_type);
        if media.is_empty() {
            return false;
        }

        self.allowed.iter().any(|allowed| {
            allowed == &media
                || allowed
                    .strip_suffix("/*")
                    .is_some_and(|kind| media.split('/').next() == Some(kind))
        })
    }

    fn applies_to(&self, method: &Method) -> bool {
        self.methods
            .as_ref()
            .map_or(true, |methods| methods.contains(method))
    }

    fn reject(&self) -> Decision {
        Decision::ShortCircuit(Response::text(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            self.unsupported_body.clone(),
        ))
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

impl Stage for ContentTypeStage {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
        let decision = if self.applies_to(ctx.method()) {
            // A present but unreadable value counts as a declared type, never as absent.
            let declared = ctx
                .headers()
                .get(header::CONTENT_TYPE)
                .map(|value| value.to_str().ok());
            match declared {
                Some(Some(value)) if self.is_allowed(value) => Decision::Continue,
                None if !self.require => Decision::Continue,
                value => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        content_type = ?value,
                        "unsupported media type"
                    );
                    self.reject()
                }
            }
        } else {
            Decision::Continue
        };
        Box::pin(async move { decision })
    }
}
