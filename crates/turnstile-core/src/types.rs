//! HTTP request and response types used throughout the chain.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

/// The HTTP request type accepted at the chain boundary.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type produced by stages and handlers.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building responses.
pub trait ResponseExt {
    /// Creates a `text/plain` response.
    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// Creates an `application/json` response from an already-encoded body.
    fn json(status: StatusCode, body: impl Into<Bytes>) -> Response;

    /// Creates a JSON error response.
    fn json_error(status: StatusCode, code: &str, message: &str) -> Response;

    /// Reads the body back as UTF-8 text.
    ///
    /// Intended for tests and diagnostics.
    fn body_text(self) -> impl std::future::Future<Output = String> + Send;
}

fn with_content_type(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut response = http::Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

impl ResponseExt for Response {
    fn text(status: StatusCode, body: impl Into<Bytes>) -> Response {
        with_content_type(status, "text/plain; charset=utf-8", body.into())
    }

    fn json(status: StatusCode, body: impl Into<Bytes>) -> Response {
        with_content_type(status, "application/json", body.into())
    }

    fn json_error(status: StatusCode, code: &str, message: &str) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message
            }
        });
        Self::json(status, body.to_string())
    }

    async fn body_text(self) -> String {
        use http_body_util::BodyExt;

        match self.into_body().collect().await {
            Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response() {
        let response = Response::text(StatusCode::UNAUTHORIZED, "Invalid API Key");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_json_error_response() {
        let response = Response::json_error(
            StatusCode::UNAUTHORIZED,
            "AUTH_REQUIRED",
            "Authentication required",
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_body_text() {
        let response = Response::text(StatusCode::OK, "Here is your data!");
        assert_eq!(response.body_text().await, "Here is your data!");
    }
}
