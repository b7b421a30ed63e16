//! # 配置管理模块
//!
//! 处理应用配置加载、验证和环境变量覆盖

mod app_config;
mod manager;

pub use app_config::{
    AppConfig, CacheConfig, CacheType, MiddlewareConfig, RedisConfig, ServerConfig, WarmupConfig,
};
pub use manager::ConfigManager;

use std::env;
use std::path::PathBuf;

/// 解析配置文件路径
///
/// 优先级：显式参数 > `LOAN_CACHE_CONFIG_PATH` > `config/config.<RUST_ENV>.toml`
#[must_use]
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Ok(path) = env::var("LOAN_CACHE_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    let env = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
    PathBuf::from(format!("config/config.{env}.toml"))
}

/// 验证配置有效性
pub(crate) fn validate_config(config: &AppConfig) -> crate::error::Result<()> {
    config.validate().map_err(crate::error::AppError::config)
}
