//! # HTTP 缓存中间件
//!
//! - [`cache_response`]：读缓存，命中时短路返回，未命中时在后台回写
//! - [`invalidate_cache`]：写请求成功后在后台按规则批量失效
//!
//! 两者都通过 `axum::middleware::from_fn_with_state` 挂载到路由上。
//! 缓存故障对调用方不可见，最坏情况只是响应未被缓存。

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::keys::{InvalidationContext, InvalidationRule, KeyParts};
use super::store::CacheStore;
use super::strategies::{CacheCandidate, CachePolicy, CacheTtl};
use crate::auth::AuthContext;
use crate::config::MiddlewareConfig;
use crate::{ldebug, lwarn, logging::{LogComponent, LogStage}};

/// 命中/未命中标记头
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
/// 缓存键（或其摘要）头
pub const X_CACHE_KEY: HeaderName = HeaderName::from_static("x-cache-key");

/// `X-Cache-Key` 摘要模式下保留的十六进制位数
const KEY_DIGEST_LEN: usize = 16;

/// 缓存中的响应快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub body: Value,
    pub content_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CachedResponse {
    fn is_json(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_json_content_type)
    }

    fn body_bytes(&self) -> Option<Vec<u8>> {
        match (&self.body, self.is_json()) {
            (Value::String(text), false) => Some(text.clone().into_bytes()),
            (value, true) => serde_json::to_vec(value).ok(),
            (_, false) => None,
        }
    }
}

/// 读缓存中间件状态
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<CacheStore>,
    policy: Arc<CachePolicy>,
    expose_cache_key: bool,
    max_body_bytes: usize,
}

impl ResponseCache {
    /// 使用中间件配置中的默认 TTL 创建
    #[must_use]
    pub fn new(store: Arc<CacheStore>, config: &MiddlewareConfig) -> Self {
        Self {
            store,
            policy: Arc::new(
                CachePolicy::default().with_ttl(CacheTtl::from_seconds(config.default_ttl)),
            ),
            expose_cache_key: config.expose_cache_key,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// 替换路由级策略
    #[must_use]
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn cache_key_header(&self, key: &str) -> Option<HeaderValue> {
        if self.expose_cache_key {
            HeaderValue::from_str(key).ok()
        } else {
            let digest = hex::encode(Sha256::digest(key.as_bytes()));
            HeaderValue::from_str(&digest[..KEY_DIGEST_LEN]).ok()
        }
    }
}

/// 读缓存中间件
pub async fn cache_response(
    State(cache): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    // HEAD 与 GET 共享缓存条目
    let get = Method::GET;
    let key = {
        let mut parts = KeyParts::from_request(&request, &cache.policy.vary_by);
        parts.method = &get;
        cache.policy.key_generator.generate(&parts)
    };
    let path = request.uri().path().to_string();
    let key_header = cache.cache_key_header(&key);

    if cache.policy.skip_on_error && !cache.store.is_connected() {
        let response = next.run(request).await;
        return with_cache_headers(response, "BYPASS", key_header);
    }

    if !bypass_requested(request.headers()) {
        if let Some(cached) = cache.store.get::<CachedResponse>(&key).await {
            if let Some(response) = hit_response(&cached, method == Method::HEAD) {
                ldebug!(
                    "system",
                    LogStage::Request,
                    LogComponent::CacheMiddleware,
                    "cache_hit",
                    &format!("缓存命中: {method} {path}")
                );
                return with_cache_headers(response, "HIT", key_header);
            }
        }
    }

    let response = next.run(request).await;
    if method == Method::HEAD {
        return with_cache_headers(response, "MISS", key_header);
    }

    let response = populate(&cache, key, method, path, response);
    with_cache_headers(response, "MISS", key_header)
}

/// 边转发边记录响应体，流结束且符合条件时在后台写入缓存
///
/// 响应头立即返回，响应体按原样逐块转发；记录超过 `max_body_bytes` 后放弃缓存，
/// 转发继续。读取出错时错误原样交给下游，本次响应不缓存。
fn populate(
    cache: &ResponseCache,
    key: String,
    method: Method,
    path: String,
    response: Response,
) -> Response {
    let declared_len = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > cache.max_body_bytes) {
        return response;
    }

    let (parts, body) = response.into_parts();
    let capture = BodyCapture {
        cache: cache.clone(),
        key,
        method,
        path,
        status: parts.status,
        content_type: parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        buffer: Vec::with_capacity(declared_len.unwrap_or_default()),
    };

    let stream = stream::unfold(
        (body.into_data_stream(), Some(capture)),
        |(mut inner, mut capture)| async move {
            match inner.next().await {
                Some(Ok(chunk)) => {
                    if let Some(recording) = capture.as_mut()
                        && !recording.push(&chunk)
                    {
                        capture = None;
                    }
                    Some((Ok(chunk), (inner, capture)))
                }
                Some(Err(err)) => {
                    if let Some(recording) = &capture {
                        lwarn!(
                            "system",
                            LogStage::Request,
                            LogComponent::CacheMiddleware,
                            "read_body_failed",
                            &format!("读取响应体失败: {} {}", recording.method, recording.path),
                            error = %err
                        );
                    }
                    Some((Err(err), (inner, None)))
                }
                None => {
                    if let Some(recording) = capture {
                        recording.finish();
                    }
                    None
                }
            }
        },
    );

    Response::from_parts(parts, Body::from_stream(stream))
}

/// 正在转发的响应体记录
struct BodyCapture {
    cache: ResponseCache,
    key: String,
    method: Method,
    path: String,
    status: StatusCode,
    content_type: Option<String>,
    buffer: Vec<u8>,
}

impl BodyCapture {
    /// 追加一块数据；超过上限返回 `false`
    fn push(&mut self, chunk: &Bytes) -> bool {
        if self.buffer.len() + chunk.len() > self.cache.max_body_bytes {
            return false;
        }
        self.buffer.extend_from_slice(chunk);
        true
    }

    fn finish(self) {
        let Some(body) = body_value(&self.buffer, self.content_type.as_deref()) else {
            return;
        };

        let candidate = CacheCandidate {
            method: &self.method,
            path: &self.path,
            status: self.status,
            body_len: self.buffer.len(),
            body: &body,
        };
        if !self.cache.policy.condition.accepts(&candidate) {
            return;
        }

        let cached = CachedResponse {
            status_code: self.status.as_u16(),
            body,
            content_type: self.content_type,
            timestamp: Utc::now(),
        };
        spawn_write_back(
            Arc::clone(&self.cache.store),
            self.key,
            cached,
            self.cache.policy.ttl.as_store_ttl(),
        );
    }
}

fn spawn_write_back(store: Arc<CacheStore>, key: String, cached: CachedResponse, ttl: i64) {
    tokio::spawn(async move {
        if !store.set_with_ttl(&key, &cached, ttl).await {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::CacheMiddleware,
                "write_back_skipped",
                "响应未写入缓存",
                key = %key
            );
        }
    });
}

fn hit_response(cached: &CachedResponse, head: bool) -> Option<Response> {
    let status = StatusCode::from_u16(cached.status_code).ok()?;
    let bytes = cached.body_bytes()?;

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = &cached.content_type {
        builder = builder.header(CONTENT_TYPE, content_type.as_str());
    }
    let body = if head { Body::empty() } else { Body::from(bytes) };
    builder.body(body).ok()
}

fn with_cache_headers(
    mut response: Response,
    marker: &'static str,
    key_header: Option<HeaderValue>,
) -> Response {
    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static(marker));
    if let Some(value) = key_header {
        headers.insert(X_CACHE_KEY, value);
    }
    response
}

/// `Cache-Control: no-cache` / `no-store` 请求跳过查找
fn bypass_requested(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|directive| directive.trim().to_ascii_lowercase())
        .any(|directive| directive == "no-cache" || directive == "no-store")
}

fn is_json_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

/// JSON 响应按 JSON 保存，其余 UTF-8 文本按字符串保存
fn body_value(bytes: &[u8], content_type: Option<&str>) -> Option<Value> {
    if content_type.is_some_and(is_json_content_type) {
        serde_json::from_slice(bytes).ok()
    } else {
        std::str::from_utf8(bytes)
            .ok()
            .map(|text| Value::String(text.to_string()))
    }
}

/// 失效中间件状态
#[derive(Clone)]
pub struct CacheInvalidation {
    store: Arc<CacheStore>,
    rules: Arc<[InvalidationRule]>,
}

impl CacheInvalidation {
    #[must_use]
    pub fn new(store: Arc<CacheStore>, rules: impl Into<Vec<InvalidationRule>>) -> Self {
        let rules: Vec<InvalidationRule> = rules.into();
        Self {
            store,
            rules: Arc::from(rules),
        }
    }

    #[must_use]
    pub fn rules(&self) -> &[InvalidationRule] {
        &self.rules
    }
}

/// 写请求失效中间件
///
/// 失效在响应返回之后进行，期间到达的读请求可能读到旧值。
pub async fn invalidate_cache(
    State(invalidation): State<CacheInvalidation>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    if !is_write_method(&method) {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let subject = request.extensions().get::<AuthContext>().cloned();

    let response = next.run(request).await;
    let status = response.status();
    if !status.is_success() {
        return response;
    }

    tokio::spawn(async move {
        let ctx = InvalidationContext {
            method: &method,
            path: &path,
            query: query.as_deref(),
            subject: subject.as_ref(),
            status,
        };
        run_invalidation(&invalidation, &ctx).await;
    });

    response
}

/// 逐条解析规则并删除，返回删除的键总数
pub async fn run_invalidation(
    invalidation: &CacheInvalidation,
    ctx: &InvalidationContext<'_>,
) -> u64 {
    let mut total = 0;
    for rule in invalidation.rules.iter() {
        let Some(pattern) = rule.resolve(ctx) else {
            continue;
        };

        let removed = invalidation.store.del_pattern(&pattern).await;
        total += removed;
        ldebug!(
            "system",
            LogStage::Invalidation,
            LogComponent::CacheMiddleware,
            "invalidate",
            &format!("{} {} 触发缓存失效", ctx.method, ctx.path),
            pattern = %pattern,
            removed = removed
        );
    }
    total
}

fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn no_cache_directive_is_detected() {
        let mut headers = HeaderMap::new();
        assert!(!bypass_requested(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0, No-Cache"));
        assert!(bypass_requested(&headers));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(bypass_requested(&headers));
    }

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/plain"));
    }

    #[test]
    fn text_bodies_round_trip_without_quoting() {
        let cached = CachedResponse {
            status_code: 200,
            body: body_value(&Bytes::from_static(b"\"quoted\""), Some("text/plain")).unwrap(),
            content_type: Some("text/plain".to_string()),
            timestamp: Utc::now(),
        };
        assert_eq!(cached.body_bytes().unwrap(), b"\"quoted\"".to_vec());
    }

    #[test]
    fn json_bodies_are_reencoded() {
        let cached = CachedResponse {
            status_code: 200,
            body: json!({"count": 3}),
            content_type: Some("application/json".to_string()),
            timestamp: Utc::now(),
        };
        assert_eq!(cached.body_bytes().unwrap(), br#"{"count":3}"#.to_vec());
    }

    #[test]
    fn write_methods() {
        assert!(is_write_method(&Method::DELETE));
        assert!(!is_write_method(&Method::GET));
        assert!(!is_write_method(&Method::OPTIONS));
    }
}
