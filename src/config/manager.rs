//! # 配置管理器
//!
//! 统一的配置加载接口：读取 TOML 文件、应用环境变量覆盖、校验

use std::collections::HashMap;
use std::env;
use std::path::Path;

use tracing::{debug, info};

use super::{AppConfig, CacheType};
use crate::error::{AppError, Result};

/// 支持的环境变量及其对应的配置路径
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("CACHE_DISABLED", "cache.disabled"),
    ("CACHE_TYPE", "cache.cache_type"),
    ("CACHE_KEY_PREFIX", "cache.key_prefix"),
    ("REDIS_HOST", "cache.redis.host"),
    ("REDIS_PORT", "cache.redis.port"),
    ("REDIS_PASSWORD", "cache.redis.password"),
    ("REDIS_DB", "cache.redis.database"),
    ("SERVER_PORT", "server.port"),
];

/// 配置管理器
pub struct ConfigManager {
    /// 当前配置
    config: AppConfig,
    /// 已生效的环境变量覆盖
    env_overrides: HashMap<String, String>,
}

impl ConfigManager {
    /// 从指定文件创建配置管理器
    ///
    /// 文件不存在时使用默认配置（仍然会应用环境变量覆盖）。
    pub fn from_file(config_path: impl AsRef<Path>) -> Result<Self> {
        let config_path = config_path.as_ref();

        let config = if config_path.exists() {
            Self::load_config_file(config_path)?
        } else {
            info!(path = %config_path.display(), "配置文件不存在，使用默认配置");
            AppConfig::default()
        };

        Self::with_overrides(config, Self::build_env_overrides())
    }

    /// 基于已有配置与覆盖映射创建管理器
    pub fn with_overrides(
        mut config: AppConfig,
        env_overrides: HashMap<String, String>,
    ) -> Result<Self> {
        Self::apply_env_overrides(&mut config, &env_overrides)?;
        super::validate_config(&config)?;

        info!(
            cache_enabled = config.cache.enabled,
            cache_type = ?config.cache.cache_type,
            overrides = env_overrides.len(),
            "配置管理器初始化完成"
        );

        Ok(Self {
            config,
            env_overrides,
        })
    }

    /// 获取当前配置
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置副本
    #[must_use]
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// 已应用的环境变量覆盖数量
    #[must_use]
    pub fn override_count(&self) -> usize {
        self.env_overrides.len()
    }

    /// 加载配置文件
    fn load_config_file(path: &Path) -> Result<AppConfig> {
        let config_content = std::fs::read_to_string(path).map_err(|e| {
            AppError::config_with_source(format!("读取配置文件失败: {}", path.display()), e)
        })?;

        toml::from_str(&config_content).map_err(|e| {
            AppError::config_with_source(
                format!("TOML解析失败 - 配置文件: {}, 详细错误: {e}", path.display()),
                e,
            )
        })
    }

    /// 构建环境变量覆盖映射
    fn build_env_overrides() -> HashMap<String, String> {
        let overrides: HashMap<String, String> = ENV_OVERRIDES
            .iter()
            .filter_map(|(var, path)| env::var(var).ok().map(|value| ((*path).to_string(), value)))
            .collect();

        debug!("发现 {} 个环境变量覆盖", overrides.len());
        overrides
    }

    /// 应用环境变量覆盖
    fn apply_env_overrides(
        config: &mut AppConfig,
        overrides: &HashMap<String, String>,
    ) -> Result<()> {
        for (path, value) in overrides {
            debug!(
                "应用环境变量覆盖: {} = {}",
                path,
                if path.contains("password") { "***" } else { value.as_str() }
            );

            Self::apply_override_to_config(config, path, value)?;
        }
        Ok(())
    }

    /// 将环境变量覆盖应用到配置对象
    fn apply_override_to_config(config: &mut AppConfig, path: &str, value: &str) -> Result<()> {
        let parts: Vec<&str> = path.split('.').collect();

        match parts.as_slice() {
            ["cache", "disabled"] => {
                config.cache.enabled = !parse_bool(path, value)?;
            }
            ["cache", "cache_type"] => {
                config.cache.cache_type = match value.to_ascii_lowercase().as_str() {
                    "memory" => CacheType::Memory,
                    "redis" => CacheType::Redis,
                    other => {
                        return Err(crate::config_error!(
                            "环境变量覆盖值无效: {} = {}",
                            path,
                            other
                        ));
                    }
                };
            }
            ["cache", "key_prefix"] => config.cache.key_prefix = value.to_string(),
            ["cache", "redis", "host"] => config.cache.redis.host = value.to_string(),
            ["cache", "redis", "port"] => config.cache.redis.port = parse_number(path, value)?,
            ["cache", "redis", "password"] => {
                config.cache.redis.password = (!value.is_empty()).then(|| value.to_string());
            }
            ["cache", "redis", "database"] => {
                config.cache.redis.database = parse_number(path, value)?;
            }
            ["server", "port"] => config.server.port = parse_number(path, value)?,
            _ => debug!("忽略未知的配置覆盖: {}", path),
        }
        Ok(())
    }
}

fn parse_bool(path: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(crate::config_error!("环境变量覆盖值无效: {} = {}", path, value)),
    }
}

fn parse_number<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| crate::config_error!("环境变量覆盖值无效: {} = {}", path, value))
}
