//! HTTP 缓存中间件集成测试

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::{Body, Bytes, to_bytes};
use axum::extract::State;
use axum::http::{HeaderValue, Method, Request, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use loan_cache::auth::AuthContext;
use loan_cache::cache::keys::InvalidationContext;
use loan_cache::cache::{
    CacheInvalidation, CacheStore, CachePolicy, CacheTtl, InvalidationRule, ResponseCache,
    X_CACHE, X_CACHE_KEY, cache_response, invalidate_cache,
};
use loan_cache::config::{CacheConfig, CacheType, MiddlewareConfig, RedisConfig};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Calls(Arc<AtomicUsize>);

impl Calls {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

async fn list_loans(State(calls): State<Calls>) -> Json<Value> {
    let n = calls.0.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({"loans": [{"id": 1, "amount": 5000}], "call": n}))
}

async fn create_loan(State(calls): State<Calls>) -> (StatusCode, Json<Value>) {
    calls.0.fetch_add(1, Ordering::SeqCst);
    (StatusCode::CREATED, Json(json!({"id": 2})))
}

async fn rejected_loan() -> (StatusCode, Json<Value>) {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": "invalid"})))
}

async fn profile() -> Json<Value> {
    Json(json!({"id": 1, "accessToken": "secret-value"}))
}

fn streamed(chunks: Vec<std::io::Result<Bytes>>) -> Response {
    Response::builder()
        .header("content-type", "application/json")
        .body(Body::from_stream(futures::stream::iter(chunks)))
        .expect("valid response")
}

async fn chunked_report() -> Response {
    streamed(vec![
        Ok(Bytes::from_static(b"{\"rows\":")),
        Ok(Bytes::from_static(b"[1,2,3]}")),
    ])
}

async fn broken_report() -> Response {
    streamed(vec![
        Ok(Bytes::from_static(b"{\"rows\":")),
        Err(std::io::Error::other("upstream reset")),
    ])
}

async fn live_report() -> Response {
    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(
            futures::stream::pending::<std::io::Result<Bytes>>(),
        ))
        .expect("valid response")
}

fn report_app(store: &Arc<CacheStore>, config: &MiddlewareConfig) -> Router {
    let cache = ResponseCache::new(Arc::clone(store), config);
    Router::new()
        .route("/api/reports/chunked", get(chunked_report))
        .route("/api/reports/broken", get(broken_report))
        .route("/api/reports/live", get(live_report))
        .layer(from_fn_with_state(cache, cache_response))
}

async fn connected_store() -> Arc<CacheStore> {
    let store = CacheStore::new(CacheConfig::memory());
    store.connect().await;
    store
}

fn middleware_config() -> MiddlewareConfig {
    MiddlewareConfig {
        expose_cache_key: true,
        ..MiddlewareConfig::default()
    }
}

fn app(store: &Arc<CacheStore>, calls: &Calls) -> Router {
    let cache = ResponseCache::new(Arc::clone(store), &middleware_config());
    let invalidation = CacheInvalidation::new(
        Arc::clone(store),
        vec![InvalidationRule::route_prefix("/api/loans")],
    );

    Router::new()
        .route("/api/loans", get(list_loans).post(create_loan))
        .route("/api/loans/rejected", get(rejected_loan).post(rejected_loan))
        .route("/api/profile", get(profile))
        .layer(from_fn_with_state(cache, cache_response))
        .layer(from_fn_with_state(invalidation, invalidate_cache))
        .with_state(calls.clone())
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("valid request")
}

fn as_subject(mut request: Request<Body>, subject: AuthContext) -> Request<Body> {
    request.extensions_mut().insert(subject);
    request
}

fn marker(response: &Response) -> &str {
    response
        .headers()
        .get(X_CACHE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// 发送请求并读完响应体，返回缓存标记与响应体
///
/// 回写在响应体读完之后才会触发
async fn fetch(app: &Router, request: Request<Body>) -> (String, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let marker = marker(&response).to_string();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    (marker, bytes)
}

/// 写回在后台进行，轮询直到键出现
async fn wait_for_key_count(store: &CacheStore, expected: u64) {
    for _ in 0..100 {
        if store.get_stats().await.key_count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cache did not reach {expected} keys");
}

#[tokio::test]
async fn second_read_is_served_from_cache() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    let first = app.clone().oneshot(request(Method::GET, "/api/loans")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(marker(&first), "MISS");
    let first_body = body_json(first).await;
    wait_for_key_count(&store, 1).await;

    let second = app.oneshot(request(Method::GET, "/api/loans")).await.unwrap();
    assert_eq!(marker(&second), "HIT");
    assert_eq!(
        second.headers().get("content-type"),
        Some(&HeaderValue::from_static("application/json"))
    );
    assert_eq!(body_json(second).await, first_body);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn cache_key_header_exposes_the_key() {
    let store = connected_store().await;
    let calls = Calls::default();

    let response = app(&store, &calls)
        .oneshot(request(Method::GET, "/api/loans?status=open&page=2"))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(X_CACHE_KEY).unwrap(),
        "GET:/api/loans:anonymous:page=2&status=open:"
    );
}

#[tokio::test]
async fn cache_key_header_is_hashed_by_default() {
    let store = connected_store().await;
    let cache = ResponseCache::new(Arc::clone(&store), &MiddlewareConfig::default());
    let app = Router::new()
        .route("/api/loans", get(list_loans))
        .layer(from_fn_with_state(cache, cache_response))
        .with_state(Calls::default());

    let response = app.oneshot(request(Method::GET, "/api/loans")).await.unwrap();
    let header = response.headers().get(X_CACHE_KEY).unwrap().to_str().unwrap();
    assert_eq!(header.len(), 16);
    assert!(header.chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn query_parameter_order_does_not_matter() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    let (first, _) =
        fetch(&app, request(Method::GET, "/api/loans?status=open&page=2")).await;
    assert_eq!(first, "MISS");
    wait_for_key_count(&store, 1).await;

    let second = app
        .oneshot(request(Method::GET, "/api/loans?page=2&status=open"))
        .await
        .unwrap();
    assert_eq!(marker(&second), "HIT");
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn subjects_never_share_entries() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    let officer = AuthContext::new("u1").with_role("loan_officer").with_region("north");
    let (first, _) = fetch(
        &app,
        as_subject(request(Method::GET, "/api/loans"), officer.clone()),
    )
    .await;
    assert_eq!(first, "MISS");
    wait_for_key_count(&store, 1).await;

    let other_region = AuthContext::new("u1").with_role("loan_officer").with_region("south");
    let (second, _) = fetch(
        &app,
        as_subject(request(Method::GET, "/api/loans"), other_region),
    )
    .await;
    assert_eq!(second, "MISS");

    let (anonymous, _) = fetch(&app, request(Method::GET, "/api/loans")).await;
    assert_eq!(anonymous, "MISS");
    wait_for_key_count(&store, 3).await;

    let again = app
        .oneshot(as_subject(request(Method::GET, "/api/loans"), officer))
        .await
        .unwrap();
    assert_eq!(marker(&again), "HIT");
    assert_eq!(calls.count(), 3);
}

#[tokio::test]
async fn successful_write_invalidates_route_prefix() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    fetch(&app, request(Method::GET, "/api/loans")).await;
    wait_for_key_count(&store, 1).await;

    let created = app.clone().oneshot(request(Method::POST, "/api/loans")).await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    assert!(created.headers().get(X_CACHE).is_none());
    wait_for_key_count(&store, 0).await;

    let fresh = app.oneshot(request(Method::GET, "/api/loans")).await.unwrap();
    assert_eq!(marker(&fresh), "MISS");
    // GET + POST + GET
    assert_eq!(calls.count(), 3);
}

#[tokio::test]
async fn failed_write_keeps_cache() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    fetch(&app, request(Method::GET, "/api/loans")).await;
    wait_for_key_count(&store, 1).await;

    let rejected = app
        .oneshot(request(Method::POST, "/api/loans/rejected"))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_stats().await.key_count, 1);
}

#[tokio::test]
async fn non_success_and_sensitive_responses_are_not_cached() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    let (rejected, _) = fetch(&app, request(Method::GET, "/api/loans/rejected")).await;
    assert_eq!(rejected, "MISS");
    let (profile, body) = fetch(&app, request(Method::GET, "/api/profile")).await;
    assert_eq!(profile, "MISS");
    assert!(!body.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_stats().await.key_count, 0);

    let again = app.oneshot(request(Method::GET, "/api/profile")).await.unwrap();
    assert_eq!(marker(&again), "MISS");
}

#[tokio::test]
async fn no_cache_request_skips_lookup() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    fetch(&app, request(Method::GET, "/api/loans")).await;
    wait_for_key_count(&store, 1).await;

    let mut forced = request(Method::GET, "/api/loans");
    forced
        .headers_mut()
        .insert("cache-control", HeaderValue::from_static("no-cache"));
    let response = app.oneshot(forced).await.unwrap();
    assert_eq!(marker(&response), "MISS");
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn head_shares_the_get_entry() {
    let store = connected_store().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    fetch(&app, request(Method::GET, "/api/loans")).await;
    wait_for_key_count(&store, 1).await;

    let head = app.oneshot(request(Method::HEAD, "/api/loans")).await.unwrap();
    assert_eq!(marker(&head), "HIT");
    let bytes = to_bytes(head.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.is_empty());
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn degraded_store_bypasses_cache() {
    let store = CacheStore::new(CacheConfig {
        cache_type: CacheType::Redis,
        reconnect_interval_secs: 3600,
        redis: RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_ms: 200,
            command_timeout_ms: 200,
            ..RedisConfig::default()
        },
        ..CacheConfig::default()
    });
    store.connect().await;
    let calls = Calls::default();
    let app = app(&store, &calls);

    for _ in 0..2 {
        let response = app.clone().oneshot(request(Method::GET, "/api/loans")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(marker(&response), "BYPASS");
        assert_eq!(
            response.headers().get(X_CACHE_KEY).unwrap(),
            "GET:/api/loans:anonymous::"
        );
    }
    let created = app.oneshot(request(Method::POST, "/api/loans")).await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(calls.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn policy_ttl_bounds_entry_lifetime() {
    let store = connected_store().await;
    let calls = Calls::default();
    let cache = ResponseCache::new(Arc::clone(&store), &middleware_config())
        .with_policy(CachePolicy::default().with_ttl(CacheTtl::Custom(30)));
    let app = Router::new()
        .route("/api/loans", get(list_loans))
        .layer(from_fn_with_state(cache, cache_response))
        .with_state(calls.clone());

    fetch(&app, request(Method::GET, "/api/loans")).await;
    wait_for_key_count(&store, 1).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    let response = app.oneshot(request(Method::GET, "/api/loans")).await.unwrap();
    assert_eq!(marker(&response), "MISS");
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn derived_rules_resolve_from_the_write() {
    fn loan_detail(ctx: &InvalidationContext<'_>) -> Option<String> {
        ctx.path
            .strip_prefix("/api/loans/")
            .map(|id| format!("GET:/api/loan-details/{id}*"))
    }

    let store = connected_store().await;
    assert!(store.set("GET:/api/loan-details/9:anonymous::", &json!({"id": 9})).await);
    assert!(store.set("GET:/api/loan-details/10:anonymous::", &json!({"id": 10})).await);

    let invalidation =
        CacheInvalidation::new(Arc::clone(&store), vec![InvalidationRule::derived(loan_detail)]);
    let ctx = InvalidationContext {
        method: &Method::PUT,
        path: "/api/loans/9",
        query: None,
        subject: None,
        status: StatusCode::OK,
    };
    assert_eq!(
        loan_cache::cache::middleware::run_invalidation(&invalidation, &ctx).await,
        1
    );
    assert!(store.exists("GET:/api/loan-details/10:anonymous::").await);
}

#[tokio::test]
async fn open_stream_does_not_hold_back_headers() {
    let store = connected_store().await;
    let app = report_app(&store, &middleware_config());

    let response = tokio::time::timeout(
        Duration::from_secs(1),
        app.oneshot(request(Method::GET, "/api/reports/live")),
    )
    .await
    .expect("headers must arrive while the body is still open")
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(marker(&response), "MISS");
    assert_eq!(store.get_stats().await.key_count, 0);
}

#[tokio::test]
async fn chunked_body_is_cached_once_fully_read() {
    let store = connected_store().await;
    let app = report_app(&store, &middleware_config());

    let (first, body) = fetch(&app, request(Method::GET, "/api/reports/chunked")).await;
    assert_eq!(first, "MISS");
    assert_eq!(&body[..], br#"{"rows":[1,2,3]}"#);
    wait_for_key_count(&store, 1).await;

    let (second, cached) = fetch(&app, request(Method::GET, "/api/reports/chunked")).await;
    assert_eq!(second, "HIT");
    assert_eq!(&cached[..], br#"{"rows":[1,2,3]}"#);
}

#[tokio::test]
async fn body_error_reaches_the_client_and_is_not_cached() {
    let store = connected_store().await;
    let app = report_app(&store, &middleware_config());

    let response = app
        .clone()
        .oneshot(request(Method::GET, "/api/reports/broken"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(marker(&response), "MISS");
    assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_stats().await.key_count, 0);
}

#[tokio::test]
async fn oversized_stream_is_forwarded_but_not_cached() {
    let store = connected_store().await;
    let config = MiddlewareConfig {
        max_body_bytes: 8,
        ..middleware_config()
    };
    let app = report_app(&store, &config);

    let (first, body) = fetch(&app, request(Method::GET, "/api/reports/chunked")).await;
    assert_eq!(first, "MISS");
    assert_eq!(&body[..], br#"{"rows":[1,2,3]}"#);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_stats().await.key_count, 0);
}
