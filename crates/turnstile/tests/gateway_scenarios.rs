//! Request scenarios against gateways assembled from configuration.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;
use turnstile::middleware::stages::{ManualClock, RateLimitStore};
use turnstile::middleware::ExecutorConfig;
use turnstile::prelude::*;
use turnstile::BootstrapError;

const GATEWAY_TOML: &str = r#"
    [logging]
    level = "debug"

    [[stages]]
    name = "request-logging"
    kind = "logging"
    priority = 0
    user_agent = true

    [[stages]]
    name = "api-key"
    kind = "api_key"
    paths = ["/api/**"]
    priority = 10
    header = "X-API-KEY"
    keys = ["my-secret-key"]
    failure_body = "Invalid API Key"

    [[stages]]
    name = "bearer"
    kind = "bearer"
    paths = ["/info"]
    priority = 10
    tokens = ["my-token"]

    [[stages]]
    name = "json-only"
    kind = "content_type"
    paths = ["/api/**"]
    priority = 20
    allowed_types = ["application/json"]
    body_methods_only = true
    require = true

    [[stages]]
    name = "internal-only"
    kind = "access"
    paths = ["/admin/**"]
    priority = 5
    allowed_addresses = ["10.0.0.1", "::1"]

    [[stages]]
    name = "throttle"
    kind = "rate_limit"
    paths = ["/limited/**"]
    priority = 5
    max_requests = 10
    window_millis = 60000
"#;

fn load(toml_src: &str) -> TurnstileConfig {
    ConfigLoader::new()
        .with_string(toml_src, "toml")
        .unwrap()
        .load()
        .unwrap()
}

struct Fixture {
    gateway: Gateway,
    handler_calls: Arc<AtomicUsize>,
    clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&handler_calls);
    let handler = handler_fn(move |ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        let body = if ctx.path() == "/info" {
            let agent = ctx.header("user-agent").unwrap_or("unknown");
            format!("Your User-Agent is: {agent}")
        } else {
            "Here is your data!".to_string()
        };
        async move { Ok(Response::text(StatusCode::OK, body)) }
    });

    let clock = Arc::new(ManualClock::new());
    let factory = StageFactory::with_clock(clock.clone());
    let gateway = Gateway::from_config_with(&load(GATEWAY_TOML), Arc::new(handler), &factory).unwrap();

    Fixture {
        gateway,
        handler_calls,
        clock,
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_valid_api_key_reaches_handler() {
    let f = fixture();
    let ctx = RequestContext::builder()
        .path("/api/data")
        .header("X-API-KEY", "my-secret-key")
        .build();

    let outcome = f.gateway.handle_traced(ctx).await;
    assert_eq!(outcome.response.status(), StatusCode::OK);
    assert_eq!(outcome.invoked, vec!["request-logging", "api-key", "json-only"]);
    assert_eq!(outcome.response.body_text().await, "Here is your data!");
    assert_eq!(f.handler_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_api_key_is_rejected() {
    let f = fixture();
    let response = f
        .gateway
        .handle_context(RequestContext::builder().path("/api/data").build())
        .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.body_text().await, "Invalid API Key");
    assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_api_key_is_rejected() {
    let f = fixture();
    let ctx = RequestContext::builder()
        .path("/api/data")
        .header("X-API-KEY", "guess")
        .build();

    let response = f.gateway.handle_context(ctx).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_bearer_token_on_info() {
    let f = fixture();
    let ctx = RequestContext::builder()
        .path("/info")
        .header("authorization", "Bearer my-token")
        .header("user-agent", "curl/8.5.0")
        .build();

    let response = f.gateway.handle_context(ctx).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body_text().await, "Your User-Agent is: curl/8.5.0");

    let response = f
        .gateway
        .handle_context(RequestContext::builder().path("/info").build())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
}

// ============================================================================
// Content type
// ============================================================================

#[tokio::test]
async fn test_wrong_content_type_is_rejected() {
    let f = fixture();
    let ctx = RequestContext::builder()
        .method(Method::POST)
        .path("/api/data")
        .header("X-API-KEY", "my-secret-key")
        .header("content-type", "text/plain")
        .body("hello")
        .build();

    let outcome = f.gateway.handle_traced(ctx).await;
    assert_eq!(outcome.response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(outcome.halted_by.as_deref(), Some("json-only"));
    assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_json_post_passes() {
    let f = fixture();
    let ctx = RequestContext::builder()
        .method(Method::POST)
        .path("/api/data")
        .header("X-API-KEY", "my-secret-key")
        .header("content-type", "application/json; charset=utf-8")
        .body(r#"{"id":1}"#)
        .build();

    assert_eq!(f.gateway.handle_context(ctx).await.status(), StatusCode::OK);
}

// ============================================================================
// Access
// ============================================================================

#[tokio::test]
async fn test_admin_allow_list() {
    let f = fixture();

    let allowed = RequestContext::builder()
        .path("/admin/stats")
        .remote_addr(ip("10.0.0.1"))
        .build();
    assert_eq!(f.gateway.handle_context(allowed).await.status(), StatusCode::OK);

    let denied = RequestContext::builder()
        .path("/admin/stats")
        .remote_addr(ip("203.0.113.9"))
        .build();
    let response = f.gateway.handle_context(denied).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.body_text().await, "Forbidden");
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_eleventh_request_is_throttled() {
    let f = fixture();
    let request = || {
        RequestContext::builder()
            .path("/limited/resource")
            .remote_addr(ip("10.0.0.1"))
            .build()
    };

    for i in 1..=10 {
        let response = f.gateway.handle_context(request()).await;
        assert_eq!(response.status(), StatusCode::OK, "request {i}");
    }

    let response = f.gateway.handle_context(request()).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(f.handler_calls.load(Ordering::SeqCst), 10);

    // Other clients have their own budget.
    let other = RequestContext::builder()
        .path("/limited/resource")
        .remote_addr(ip("10.0.0.2"))
        .build();
    assert_eq!(f.gateway.handle_context(other).await.status(), StatusCode::OK);

    f.clock.advance(Duration::from_millis(60_000));
    assert_eq!(f.gateway.handle_context(request()).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unscoped_paths_skip_stages() {
    let f = fixture();
    let outcome = f
        .gateway
        .handle_traced(RequestContext::builder().path("/public/health").build())
        .await;

    assert_eq!(outcome.response.status(), StatusCode::OK);
    assert_eq!(outcome.invoked, vec!["request-logging"]);
}

// ============================================================================
// HTTP boundary
// ============================================================================

#[tokio::test]
async fn test_handle_http_request() {
    let f = fixture();
    let request = http::Request::builder()
        .method(Method::GET)
        .uri("/api/data?page=2")
        .header("X-API-KEY", "my-secret-key")
        .body(Full::new(Bytes::new()))
        .unwrap();

    let response = f.gateway.handle(request, Some(ip("10.0.0.1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body_text().await, "Here is your data!");
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let f = fixture();
    let token = CancellationToken::new();
    token.cancel();

    let result = f
        .gateway
        .handle_with_cancellation(RequestContext::builder().path("/api/data").build(), token)
        .await;
    assert!(result.is_err());
    assert_eq!(f.handler_calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Startup
// ============================================================================

#[test]
fn test_stage_order_follows_priority_then_declaration() {
    let f = fixture();
    assert_eq!(
        f.gateway.stage_names(),
        vec!["request-logging", "internal-only", "throttle", "api-key", "bearer", "json-only"]
    );
}

#[test]
fn test_duplicate_stage_names_fail_startup() {
    let config = ConfigLoader::new()
        .with_string(
            r#"
            [[stages]]
            name = "log"
            kind = "logging"

            [[stages]]
            name = "log"
            kind = "logging"
            "#,
            "toml",
        )
        .unwrap()
        .load_unvalidated();

    let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "")) });
    let result = Gateway::from_config(&config, handler);
    assert!(matches!(result, Err(BootstrapError::Config(_))));
}

#[test]
fn test_bad_path_pattern_fails_startup() {
    let config = ConfigLoader::new()
        .with_string(
            r#"
            [[stages]]
            name = "log"
            kind = "logging"
            paths = ["/api/**x"]
            "#,
            "toml",
        )
        .unwrap()
        .load()
        .unwrap();

    let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "")) });
    let result = Gateway::from_config(&config, handler);
    assert!(matches!(result, Err(BootstrapError::Registry(_))));
}

#[test]
fn test_registry_frozen_after_startup() {
    let f = fixture();
    assert!(f.gateway.executor().registry().is_frozen());
}

#[tokio::test]
async fn test_closed_rate_limit_windows_do_not_accumulate() {
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(RateLimitStore::with_clock(clock.clone()).with_sweep_interval(5));
    let registry = StageRegistry::new();
    registry
        .register(
            StageDescriptor::builder(
                "throttle",
                RateLimitStage::builder()
                    .limit(10)
                    .window(Duration::from_secs(60))
                    .per_address()
                    .store(Arc::clone(&store))
                    .build(),
            )
            .build()
            .unwrap(),
        )
        .unwrap();
    let handler = handler_fn(|_ctx| async { Ok(Response::text(StatusCode::OK, "ok")) });
    let gateway = Gateway::from_registry(Arc::new(registry), Arc::new(handler), ExecutorConfig::default());

    for last in 1..=4 {
        let ctx = RequestContext::builder()
            .path("/limited/x")
            .remote_addr(ip(&format!("10.1.0.{last}")))
            .build();
        assert_eq!(gateway.handle_context(ctx).await.status(), StatusCode::OK);
    }
    assert_eq!(store.len(), 4);

    clock.advance(Duration::from_millis(60_000));
    let ctx = RequestContext::builder()
        .path("/limited/x")
        .remote_addr(ip("10.1.0.5"))
        .build();
    assert_eq!(gateway.handle_context(ctx).await.status(), StatusCode::OK);
    assert_eq!(store.len(), 1);
}
