//! # 日志配置模块
//!
//! 提供 tracing 订阅器初始化，以及带阶段/组件标签的结构化日志宏。
//!
//! 所有日志统一通过 `linfo!` / `ldebug!` / `lwarn!` / `lerror!` 输出，
//! 参数顺序为 `(request_id, LogStage, LogComponent, operation, message, 额外字段...)`。
//! 后台任务使用 `"system"` 作为 `request_id`。

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt};

/// 日志所处的处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStage {
    /// 进程启动
    Startup,
    /// 进程关闭
    Shutdown,
    /// 配置加载
    Configuration,
    /// 缓存读写
    Cache,
    /// 缓存预热
    Warmup,
    /// 缓存失效
    Invalidation,
    /// 后台任务
    BackgroundTask,
    /// 请求处理
    Request,
    /// 内部错误
    Internal,
}

impl LogStage {
    /// 阶段的稳定字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::Cache => "cache",
            Self::Warmup => "warmup",
            Self::Invalidation => "invalidation",
            Self::BackgroundTask => "background_task",
            Self::Request => "request",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 产生日志的组件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogComponent {
    /// 主程序
    Main,
    /// 配置管理
    Config,
    /// 缓存存储
    CacheStore,
    /// Redis 客户端
    Redis,
    /// 缓存中间件
    CacheMiddleware,
    /// 预热调度器
    CacheWarmer,
    /// 服务装配
    ServerSetup,
    /// 管理接口
    Management,
}

impl LogComponent {
    /// 组件的稳定字符串表示
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::CacheStore => "cache_store",
            Self::Redis => "redis",
            Self::CacheMiddleware => "cache_middleware",
            Self::CacheWarmer => "cache_warmer",
            Self::ServerSetup => "server_setup",
            Self::Management => "management",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 内部实现：所有分级宏都展开到这里
#[doc(hidden)]
#[macro_export]
macro_rules! __log_event {
    ($level:ident, $request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(,)?) => {
        ::tracing::$level!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            "{}",
            $message
        )
    };
    ($level:ident, $request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr, $($fields:tt)+) => {
        ::tracing::$level!(
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($fields)+,
            "{}",
            $message
        )
    };
}

/// INFO 级别结构化日志
#[macro_export]
macro_rules! linfo {
    ($($args:tt)+) => { $crate::__log_event!(info, $($args)+) };
}

/// DEBUG 级别结构化日志
#[macro_export]
macro_rules! ldebug {
    ($($args:tt)+) => { $crate::__log_event!(debug, $($args)+) };
}

/// WARN 级别结构化日志
#[macro_export]
macro_rules! lwarn {
    ($($args:tt)+) => { $crate::__log_event!(warn, $($args)+) };
}

/// ERROR 级别结构化日志
#[macro_export]
macro_rules! lerror {
    ($($args:tt)+) => { $crate::__log_event!(error, $($args)+) };
}

/// 默认的过滤规则
fn default_filter(level: &str) -> String {
    format!("{level},loan_cache=debug,redis=warn,tower_http=info")
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先使用；重复调用是安全的（第二次初始化会被忽略）。
pub fn init_optimized_logging(log_level: Option<&str>) {
    let level = log_level.unwrap_or("info");
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let initialized = tracing_subscriber::registry()
        .with(EnvFilter::try_new(&log_filter).unwrap_or_else(|_| EnvFilter::new(default_filter("info"))))
        .with(
            fmt_layer::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!(filter = %log_filter, "📋 logging initialized");
    }
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                          # 标准日志级别");
    println!("  RUST_LOG=debug                         # 调试级别（包含每次缓存命中/未命中）");
    println!("  RUST_LOG=info,redis=warn               # 生产环境：屏蔽 Redis 客户端噪声");
    println!("  RUST_LOG=loan_cache::cache=trace       # 缓存层详细追踪");
    println!();
    println!("💡 组合示例:");
    println!("  RUST_LOG=info,loan_cache=info          # 生产模式：仅记录预热汇总与连接状态变化");
    println!("  RUST_LOG=debug,tower_http=debug        # 调试模式：完整请求日志");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_and_component_render_stable_names() {
        assert_eq!(LogStage::Warmup.to_string(), "warmup");
        assert_eq!(LogStage::BackgroundTask.to_string(), "background_task");
        assert_eq!(LogComponent::CacheStore.to_string(), "cache_store");
        assert_eq!(LogComponent::CacheMiddleware.as_str(), "cache_middleware");
    }

    #[test]
    fn default_filter_keeps_redis_quiet() {
        let filter = default_filter("warn");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("redis=warn"));
    }

    #[test]
    fn macros_accept_trailing_fields() {
        init_optimized_logging(Some("debug"));
        let key = "loans:region:north";
        crate::linfo!("system", LogStage::Cache, LogComponent::CacheStore, "smoke", "plain message");
        crate::ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::CacheStore,
            "smoke_fields",
            &format!("message for {key}"),
            key = %key,
            ttl = 60_u64
        );
    }
}
