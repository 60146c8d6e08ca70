//! Request context types.
//!
//! The [`RequestContext`] carries all per-request state through the middleware
//! chain and into the terminal handler. Its inbound fields are fixed at
//! construction; only the [`Attachments`] map may change as stages run.

use crate::attachment::{AttachmentKey, Attachments};
use crate::principal::{Principal, PRINCIPAL};
use crate::types::Request;
use bytes::Bytes;
use http::{HeaderMap, Method};
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each request, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking
/// and log correlation.
///
/// # Example
///
/// ```
/// use turnstile_core::RequestId;
///
/// let id = RequestId::new();
/// println!("Request ID: {}", id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RequestId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-request context that flows through the middleware chain.
///
/// `RequestContext` carries:
/// - The inbound method, path, headers, remote address, and body
/// - A unique request ID for log correlation
/// - Request timing information
/// - Typed attachments written by stages for later stages
///
/// The inbound fields have no setters. Stages receive `&mut RequestContext`
/// only so they can write attachments.
///
/// # Example
///
/// ```
/// use turnstile_core::RequestContext;
/// use http::Method;
///
/// let ctx = RequestContext::builder()
///     .method(Method::GET)
///     .path("/api/data")
///     .header("x-api-key", "my-secret-key")
///     .remote_addr("10.0.0.1".parse().unwrap())
///     .build();
///
/// assert_eq!(ctx.path(), "/api/data");
/// assert_eq!(ctx.header("X-API-KEY"), Some("my-secret-key"));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    method: Method,
    path: String,
    headers: HeaderMap,
    remote_addr: Option<IpAddr>,
    body: Bytes,
    started_at: Instant,
    attachments: Attachments,
}

impl RequestContext {
    /// Creates a context builder.
    #[must_use]
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::new()
    }

    /// Builds a context from a buffered HTTP request.
    ///
    /// The query string is not part of [`path`](Self::path).
    ///
    /// # Example
    ///
    /// ```
    /// use bytes::Bytes;
    /// use http_body_util::Full;
    /// use turnstile_core::RequestContext;
    ///
    /// # tokio_test::block_on(async {
    /// let request = http::Request::builder()
    ///     .uri("/api/data?page=2")
    ///     .header("X-API-KEY", "my-secret-key")
    ///     .body(Full::new(Bytes::new()))
    ///     .unwrap();
    ///
    /// let ctx = RequestContext::from_request(request, None).await;
    /// assert_eq!(ctx.path(), "/api/data");
    /// assert_eq!(ctx.header("x-api-key"), Some("my-secret-key"));
    /// # });
    /// ```
    pub async fn from_request(request: Request, remote_addr: Option<IpAddr>) -> Self {
        let (parts, body) = request.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };

        Self {
            request_id: RequestId::new(),
            method: parts.method,
            path: parts.uri.path().to_string(),
            headers: parts.headers,
            remote_addr,
            body,
            started_at: Instant::now(),
            attachments: Attachments::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the HTTP method.
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path, without query string.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns all request headers.
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of a header as a string.
    ///
    /// Header names are case-insensitive. Values that are not visible ASCII
    /// read as absent.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns every value of a header, in arrival order.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Returns the address of the connected peer, if known.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    /// Returns the request body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns when the request entered the chain.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the elapsed time since the request entered the chain.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Returns the attachment map.
    #[must_use]
    pub const fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// Returns a typed attachment.
    #[must_use]
    pub fn attachment<T: Send + Sync + 'static>(&self, key: AttachmentKey<T>) -> Option<&T> {
        self.attachments.get(key)
    }

    /// Writes a typed attachment, returning the value it replaced.
    pub fn attach<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>, value: T) -> Option<T> {
        self.attachments.insert(key, value)
    }

    /// Removes a typed attachment.
    pub fn detach<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>) -> Option<T> {
        self.attachments.remove(key)
    }

    /// Returns the authenticated principal, if an earlier stage attached one.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.attachments.get(PRINCIPAL)
    }
}

/// Builder for [`RequestContext`].
///
/// Used by listener adapters that already parsed the request, and by tests.
#[derive(Debug)]
pub struct RequestContextBuilder {
    request_id: Option<RequestId>,
    method: Method,
    path: String,
    headers: HeaderMap,
    remote_addr: Option<IpAddr>,
    body: Bytes,
}

impl RequestContextBuilder {
    /// Creates a builder for `GET /`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: None,
            method: Method::GET,
            path: "/".to_string(),
            headers: HeaderMap::new(),
            remote_addr: None,
            body: Bytes::new(),
        }
    }

    /// Uses a caller-supplied request ID instead of generating one.
    #[must_use]
    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Sets the path.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Appends a header value.
    ///
    /// Invalid names or values are skipped.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Replaces all headers.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the peer address.
    #[must_use]
    pub fn remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the context. Timing starts here.
    #[must_use]
    pub fn build(self) -> RequestContext {
        RequestContext {
            request_id: self.request_id.unwrap_or_default(),
            method: self.method,
            path: self.path,
            headers: self.headers,
            remote_addr: self.remote_addr,
            body: self.body,
            started_at: Instant::now(),
            attachments: Attachments::new(),
        }
    }
}

impl Default for RequestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
