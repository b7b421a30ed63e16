//! 管理接口集成测试

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use loan_cache::AppContext;
use loan_cache::cache::{WarmupTask, provider_fn};
use loan_cache::config::{AppConfig, CacheConfig};
use loan_cache::management::{AppState, create_routes};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn context() -> Arc<AppContext> {
    let config = AppConfig {
        cache: CacheConfig::memory(),
        ..AppConfig::default()
    };
    let context = Arc::new(AppContext::new(config));
    context.store().connect().await;
    context
        .warmer()
        .add_task(WarmupTask::new(
            "reference:regions",
            provider_fn(|| async { Ok(json!(["north", "south"])) }),
            600,
        ))
        .await;
    context
}

fn router(context: &Arc<AppContext>) -> Router {
    create_routes(AppState::new(Arc::clone(context)))
}

async fn call(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = body.map_or_else(Body::empty, |body| Body::from(body.to_string()));
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_reports_cache_state() {
    let context = context().await;
    let (status, body) = call(router(&context), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["cache"], "connected");
}

#[tokio::test]
async fn stats_reflect_store_counters() {
    let context = context().await;
    let store = context.store();
    assert!(store.set("a", &1).await);
    assert_eq!(store.get::<i32>("a").await, Some(1));

    let (status, body) = call(router(&context), Method::GET, "/api/cache/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["connected"], true);
    assert_eq!(body["data"]["key_count"], 1);
    assert_eq!(body["data"]["hit_count"], 1);
}

#[tokio::test]
async fn warmup_trigger_and_status() {
    let context = context().await;

    let (status, body) = call(router(&context), Method::POST, "/api/cache/warmup", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["succeeded"], 1);
    assert!(context.store().exists("reference:regions").await);

    let (_, body) = call(
        router(&context),
        Method::POST,
        "/api/cache/warmup",
        Some(json!({"keys": ["missing"]})),
    )
    .await;
    assert_eq!(body["data"]["total"], 0);

    let (_, body) = call(router(&context), Method::GET, "/api/cache/warmup", None).await;
    assert_eq!(body["data"]["is_warming"], false);
    assert_eq!(body["data"]["task_keys"], json!(["reference:regions"]));
    assert!(body["data"]["last_warmup_time"].is_string());
}

#[tokio::test]
async fn clear_by_keys_pattern_and_all() {
    let context = context().await;
    let store = context.store();
    for key in ["GET:/api/loans:anonymous::", "GET:/api/loans/1:anonymous::", "x", "y"] {
        assert!(store.set(key, &1).await);
    }

    let (status, body) = call(
        router(&context),
        Method::POST,
        "/api/cache/clear",
        Some(json!({"keys": ["x", "missing"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cleared"], 1);
    assert_eq!(body["message"], "1 keys cleared");

    let (_, body) = call(
        router(&context),
        Method::POST,
        "/api/cache/clear",
        Some(json!({"pattern": "GET:/api/loans*"})),
    )
    .await;
    assert_eq!(body["data"]["cleared"], 2);

    let (_, body) = call(
        router(&context),
        Method::POST,
        "/api/cache/clear",
        Some(json!({"all": true})),
    )
    .await;
    assert_eq!(body["data"]["cleared"], 1);
    assert!(!store.exists("y").await);
}

#[tokio::test]
async fn clear_rejects_invalid_requests() {
    let context = context().await;

    let (status, body) = call(router(&context), Method::POST, "/api/cache/clear", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = call(
        router(&context),
        Method::POST,
        "/api/cache/clear",
        Some(json!({"pattern": "GET:*:anonymous*"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clear_all_fails_when_cache_is_down() {
    let context = context().await;
    context.store().disconnect().await;

    let (status, body) = call(
        router(&context),
        Method::POST,
        "/api/cache/clear",
        Some(json!({"all": true})),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "CACHE_ERROR");
}
