//! # 缓存策略
//!
//! 定义读缓存的 TTL、键生成、可缓存性判定与 vary 规则

use axum::http::{HeaderName, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::keys::KeyGenerator;

/// 默认判定中视为敏感的字段名片段（不区分大小写）
pub const SENSITIVE_FIELD_MARKERS: [&str; 4] = ["password", "token", "secret", "key"];

/// 缓存 TTL 策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTtl {
    /// 短期缓存（1分钟）- 用于列表、频繁变化的视图
    Short,
    /// 中期缓存（5分钟）- 读缓存默认值
    Medium,
    /// 长期缓存（30分钟）- 用于聚合报表
    Long,
    /// 自定义 TTL（秒）
    Custom(u64),
    /// 永不过期（需要手动删除）
    Never,
}

impl CacheTtl {
    /// 获取TTL秒数
    #[must_use]
    pub const fn as_seconds(&self) -> Option<u64> {
        match self {
            Self::Short => Some(60),
            Self::Medium => Some(300),
            Self::Long => Some(1800),
            Self::Custom(seconds) => Some(*seconds),
            Self::Never => None,
        }
    }

    /// 转换为缓存存储使用的秒数，`0` 表示永不过期
    #[must_use]
    pub fn as_store_ttl(&self) -> i64 {
        self.as_seconds()
            .map_or(0, |seconds| i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    #[must_use]
    pub const fn from_seconds(seconds: u64) -> Self {
        Self::Custom(seconds)
    }
}

/// 待判定是否缓存的响应
#[derive(Debug, Clone, Copy)]
pub struct CacheCandidate<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub status: StatusCode,
    /// 原始响应体长度
    pub body_len: usize,
    pub body: &'a Value,
}

/// 可缓存性判定
#[derive(Debug, Clone, Copy, Default)]
pub enum CacheCondition {
    /// 仅缓存 2xx、非空、且不含敏感字段名的响应
    #[default]
    Default,
    /// 自定义判定
    Custom(fn(&CacheCandidate<'_>) -> bool),
}

impl CacheCondition {
    #[must_use]
    pub fn accepts(&self, candidate: &CacheCandidate<'_>) -> bool {
        match self {
            Self::Default => default_condition(candidate),
            Self::Custom(predicate) => predicate(candidate),
        }
    }
}

/// 默认可缓存性判定
#[must_use]
pub fn default_condition(candidate: &CacheCandidate<'_>) -> bool {
    candidate.status.is_success()
        && candidate.body_len > 0
        && !contains_sensitive_field(candidate.body)
}

/// 递归检查 JSON 中是否存在敏感字段名
#[must_use]
pub fn contains_sensitive_field(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(name, nested)| {
            let name = name.to_ascii_lowercase();
            SENSITIVE_FIELD_MARKERS
                .iter()
                .any(|marker| name.contains(marker))
                || contains_sensitive_field(nested)
        }),
        Value::Array(items) => items.iter().any(contains_sensitive_field),
        _ => false,
    }
}

/// 路由级读缓存策略
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// TTL 策略
    pub ttl: CacheTtl,
    /// 键生成器
    pub key_generator: KeyGenerator,
    /// 可缓存性判定
    pub condition: CacheCondition,
    /// 参与键生成的请求头
    pub vary_by: Vec<HeaderName>,
    /// 缓存不可用时直接放行并标记 `BYPASS`
    pub skip_on_error: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: CacheTtl::Medium,
            key_generator: KeyGenerator::Default,
            condition: CacheCondition::Default,
            vary_by: Vec::new(),
            skip_on_error: true,
        }
    }
}

impl CachePolicy {
    #[must_use]
    pub fn with_ttl(mut self, ttl: CacheTtl) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: CacheCondition) -> Self {
        self.condition = condition;
        self
    }

    /// 追加一个 vary 请求头
    #[must_use]
    pub fn vary_by(mut self, header: HeaderName) -> Self {
        self.vary_by.push(header);
        self
    }

    #[must_use]
    pub fn skip_on_error(mut self, skip_on_error: bool) -> Self {
        self.skip_on_error = skip_on_error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    static GET: Method = Method::GET;

    fn candidate<'a>(status: StatusCode, body: &'a Value, body_len: usize) -> CacheCandidate<'a> {
        CacheCandidate {
            method: &GET,
            path: "/api/loans",
            status,
            body_len,
            body,
        }
    }

    #[test]
    fn test_cache_ttl_conversion() {
        assert_eq!(CacheTtl::Short.as_seconds(), Some(60));
        assert_eq!(CacheTtl::Medium.as_seconds(), Some(300));
        assert_eq!(CacheTtl::Long.as_seconds(), Some(1800));
        assert_eq!(CacheTtl::Custom(90).as_seconds(), Some(90));
        assert_eq!(CacheTtl::Never.as_seconds(), None);
        assert_eq!(CacheTtl::Never.as_store_ttl(), 0);
        assert_eq!(CacheTtl::from_seconds(7200).as_store_ttl(), 7200);
    }

    #[rstest]
    #[case(json!({"loans": [{"id": 1, "amount": 1000}]}), true)]
    #[case(json!({"user": {"passwordHash": "x"}}), false)]
    #[case(json!([{"id": 1}, {"accessToken": "x"}]), false)]
    #[case(json!({"client_secret": "x"}), false)]
    #[case(json!({"apiKey": "x"}), false)]
    #[case(json!("a plain string mentioning password"), true)]
    fn sensitive_fields_are_detected(#[case] body: Value, #[case] cacheable: bool) {
        let c = candidate(StatusCode::OK, &body, 10);
        assert_eq!(CacheCondition::Default.accepts(&c), cacheable);
    }

    #[rstest]
    #[case(StatusCode::OK, 10, true)]
    #[case(StatusCode::CREATED, 10, true)]
    #[case(StatusCode::NOT_FOUND, 10, false)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, 10, false)]
    #[case(StatusCode::OK, 0, false)]
    fn status_and_empty_body(#[case] status: StatusCode, #[case] len: usize, #[case] cacheable: bool) {
        let body = json!({"id": 1});
        assert_eq!(CacheCondition::Default.accepts(&candidate(status, &body, len)), cacheable);
    }

    #[test]
    fn custom_condition_overrides_default() {
        fn only_not_found(c: &CacheCandidate<'_>) -> bool {
            c.status == StatusCode::NOT_FOUND
        }
        let body = json!({"error": "missing"});
        let condition = CacheCondition::Custom(only_not_found);
        assert!(condition.accepts(&candidate(StatusCode::NOT_FOUND, &body, 5)));
        assert!(!condition.accepts(&candidate(StatusCode::OK, &body, 5)));
    }

    #[test]
    fn policy_builder() {
        let report = CachePolicy::default()
            .with_ttl(CacheTtl::Long)
            .vary_by(axum::http::header::ACCEPT_LANGUAGE);
        assert_eq!(report.ttl.as_seconds(), Some(1800));
        assert_eq!(report.vary_by.len(), 1);
        assert!(report.skip_on_error);
    }
}
