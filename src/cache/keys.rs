//! # 缓存键命名规范
//!
//! HTTP 读缓存的键格式为 `{METHOD}:{path}:{subject}:{query}:{vary}`：
//!
//! - `subject`：未认证时为 `anonymous`，否则包含主体 ID、角色与区域
//! - `query`：按参数名稳定排序后的规范化查询串
//! - `vary`：`vary_by` 指定的请求头取值
//!
//! 每个片段都会转义 `:` 与 glob 元字符，保证用户可控的内容无法扩大失效模式的匹配范围。

use std::borrow::Cow;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use axum::http::{HeaderName, Method, Request, StatusCode};

use crate::auth::AuthContext;
use crate::error::{AppError, Result};

/// 未认证请求使用的主体标记
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// 生成缓存键所需的请求信息
#[derive(Debug, Clone)]
pub struct KeyParts<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub subject: Option<&'a AuthContext>,
    /// `(小写头名, 头值)`，缺失的头记为 `None`
    pub vary: Vec<(&'a str, Option<&'a str>)>,
}

impl<'a> KeyParts<'a> {
    /// 从请求中提取键信息，主体来自 [`AuthContext`] 请求扩展
    pub fn from_request<B>(request: &'a Request<B>, vary_by: &'a [HeaderName]) -> Self {
        let vary = vary_by
            .iter()
            .map(|name| {
                let value = request
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok());
                (name.as_str(), value)
            })
            .collect();

        Self {
            method: request.method(),
            path: request.uri().path(),
            query: request.uri().query(),
            subject: request.extensions().get::<AuthContext>(),
            vary,
        }
    }
}

/// 自定义键生成策略
pub trait KeyStrategy: Send + Sync {
    fn generate(&self, parts: &KeyParts<'_>) -> String;
}

/// 键生成器：默认规则或自定义策略对象
#[derive(Clone, Default)]
pub enum KeyGenerator {
    #[default]
    Default,
    Custom(Arc<dyn KeyStrategy>),
}

impl KeyGenerator {
    pub fn custom(strategy: impl KeyStrategy + 'static) -> Self {
        Self::Custom(Arc::new(strategy))
    }

    #[must_use]
    pub fn generate(&self, parts: &KeyParts<'_>) -> String {
        match self {
            Self::Default => default_key(parts),
            Self::Custom(strategy) => strategy.generate(parts),
        }
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("KeyGenerator::Default"),
            Self::Custom(_) => f.write_str("KeyGenerator::Custom(..)"),
        }
    }
}

/// 默认键生成规则
#[must_use]
pub fn default_key(parts: &KeyParts<'_>) -> String {
    let vary = parts
        .vary
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                escape_segment(name),
                escape_segment(value.unwrap_or_default())
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}:{}:{}:{}:{}",
        parts.method.as_str(),
        escape_segment(parts.path),
        subject_segment(parts.subject),
        escape_glob(&canonical_query(parts.query)),
        vary
    )
}

/// 主体片段
#[must_use]
pub fn subject_segment(subject: Option<&AuthContext>) -> String {
    let Some(subject) = subject else {
        return ANONYMOUS_SUBJECT.to_string();
    };

    let mut segment = format!("sub={}", escape_segment(&subject.subject_id));
    if let Some(role) = &subject.role {
        segment.push_str(";role=");
        segment.push_str(&escape_segment(role));
    }
    if let Some(region) = &subject.region {
        segment.push_str(";region=");
        segment.push_str(&escape_segment(region));
    }
    segment
}

/// 规范化查询串：按参数名稳定排序，同名参数保持原有顺序
#[must_use]
pub fn canonical_query(query: Option<&str>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return String::new();
    };

    let mut pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> =
        url::form_urlencoded::parse(query.as_bytes()).collect();
    pairs.sort_by(|(a, _), (b, _)| a.cmp(b));

    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// 转义键片段中的分隔符与 glob 元字符
///
/// 除 `:` 与 glob 元字符外，`;` `=` `&` 也会被转义，主体与 vary 片段内部用它们分隔字段。
#[must_use]
pub fn escape_segment(segment: &str) -> Cow<'_, str> {
    escape_chars(segment, &['%', ':', '*', '?', '[', ']', '\\', ';', '=', '&'])
}

/// 只转义 `:` 与 glob 元字符，用于已经 form 编码过的查询串
fn escape_glob(segment: &str) -> Cow<'_, str> {
    escape_chars(segment, &['%', ':', '*', '?', '[', ']', '\\'])
}

fn escape_chars<'a>(segment: &'a str, reserved: &[char]) -> Cow<'a, str> {
    if !segment.contains(reserved) {
        return Cow::Borrowed(segment);
    }

    let mut escaped = String::with_capacity(segment.len() + 8);
    for c in segment.chars() {
        if reserved.contains(&c) {
            let mut buf = [0; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(escaped, "%{byte:02X}");
            }
        } else {
            escaped.push(c);
        }
    }
    Cow::Owned(escaped)
}

/// 写操作完成后用于推导失效模式的信息
#[derive(Debug, Clone)]
pub struct InvalidationContext<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub subject: Option<&'a AuthContext>,
    pub status: StatusCode,
}

/// 根据写请求推导失效模式，返回 `None` 表示无需失效
pub type DerivePattern = fn(&InvalidationContext<'_>) -> Option<String>;

/// 缓存失效规则
#[derive(Clone)]
pub enum InvalidationRule {
    /// 固定模式，仅允许末尾一个 `*`
    Pattern(String),
    /// 由写请求推导出的模式
    Derived(DerivePattern),
}

impl InvalidationRule {
    /// 创建固定模式规则
    pub fn pattern(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        validate_pattern(&pattern)?;
        Ok(Self::Pattern(pattern))
    }

    /// 失效某个路由前缀下的全部读缓存（含子路径）
    #[must_use]
    pub fn route_prefix(path: &str) -> Self {
        Self::Pattern(route_prefix_pattern(path))
    }

    #[must_use]
    pub fn derived(derive: DerivePattern) -> Self {
        Self::Derived(derive)
    }

    /// 解析出最终模式；推导结果不合法时丢弃
    #[must_use]
    pub fn resolve(&self, ctx: &InvalidationContext<'_>) -> Option<String> {
        match self {
            Self::Pattern(pattern) => Some(pattern.clone()),
            Self::Derived(derive) => derive(ctx).filter(|pattern| validate_pattern(pattern).is_ok()),
        }
    }
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pattern(pattern) => f.debug_tuple("Pattern").field(pattern).finish(),
            Self::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// `GET:{path}*`
#[must_use]
pub fn route_prefix_pattern(path: &str) -> String {
    format!("{}:{}*", Method::GET.as_str(), escape_segment(path))
}

/// 模式中的 glob 元字符只允许出现在末尾的单个 `*`
pub fn validate_pattern(pattern: &str) -> Result<()> {
    let body = pattern.strip_suffix('*').unwrap_or(pattern);
    if pattern.is_empty() || body.contains(['*', '?', '[', ']']) {
        return Err(AppError::validation(
            format!("失效模式只允许末尾一个通配符: {pattern:?}"),
            Some("pattern".to_string()),
        ));
    }
    Ok(())
}
