use std::time::Duration;

use thiserror::Error;

/// 描述缓存后端（内存 / Redis）相关的错误。
///
/// 只在后端与 `CacheStore` 之间流转，`CacheStore` 负责记录日志并降级为未命中。
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("缓存配置错误: {0}")]
    Config(String),

    #[error("缓存操作超时: {operation} 超过 {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("缓存后端未连接")]
    NotConnected,

    #[error("缓存操作失败: {0}")]
    Operation(String),

    #[error("缓存响应异常: {0}")]
    UnexpectedResponse(String),

    #[error("Redis 客户端错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("缓存值序列化失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// 便捷构造函数，统一字符串转换。
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }

    pub fn unexpected_response(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse(message.into())
    }

    #[must_use]
    pub const fn timeout(operation: &'static str, timeout: Duration) -> Self {
        Self::Timeout { operation, timeout }
    }

    /// 是否属于连接层面的故障（需要切换到降级状态）
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::NotConnected => true,
            Self::Redis(err) => {
                err.is_io_error()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
                    || err.is_timeout()
            }
            Self::Config(_) | Self::Operation(_) | Self::UnexpectedResponse(_) | Self::Json(_) => {
                false
            }
        }
    }
}
