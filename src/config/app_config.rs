//! # 应用配置结构定义

use serde::{Deserialize, Serialize};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
}

/// HTTP 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址
    pub bind_address: String,
    /// 监听端口
    pub port: u16,
    /// 默认日志级别（`RUST_LOG` 优先）
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
        }
    }
}

/// 缓存类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// 进程内缓存（本地开发与测试）
    Memory,
    /// Redis缓存
    #[default]
    Redis,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 总开关，关闭后缓存层整体变为空操作
    pub enabled: bool,
    /// 缓存类型
    pub cache_type: CacheType,
    /// 键命名空间前缀，所有键形如 `<prefix>:<logical-key>`
    pub key_prefix: String,
    /// 默认过期时间（秒），`0` 表示不过期
    pub default_ttl: u64,
    /// 内存缓存最大条目数
    pub memory_max_entries: usize,
    /// 初次连接失败后的重连间隔（秒），`0` 表示不自动重连
    pub reconnect_interval_secs: u64,
    /// Redis 缓存配置
    pub redis: RedisConfig,
    /// HTTP 缓存中间件配置
    pub middleware: MiddlewareConfig,
    /// 预热调度配置
    pub warmup: WarmupConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_type: CacheType::Redis,
            key_prefix: "loan".to_string(),
            default_ttl: 300,
            memory_max_entries: 10_000,
            reconnect_interval_secs: 30,
            redis: RedisConfig::default(),
            middleware: MiddlewareConfig::default(),
            warmup: WarmupConfig::default(),
        }
    }
}

impl CacheConfig {
    /// 测试与本地开发使用的内存缓存配置
    #[must_use]
    pub fn memory() -> Self {
        Self {
            cache_type: CacheType::Memory,
            ..Self::default()
        }
    }
}

/// Redis配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// 服务器地址
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 数据库编号
    pub database: u8,
    /// 连接密码（可选）
    pub password: Option<String>,
    /// 连接超时时间（毫秒）
    pub connect_timeout_ms: u64,
    /// 单条命令超时时间（毫秒）
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connect_timeout_ms: 10_000,
            command_timeout_ms: 5_000,
        }
    }
}

impl RedisConfig {
    /// 构建 Redis 连接 URL
    #[must_use]
    pub fn build_url(&self) -> String {
        if let Some(password) = &self.password {
            // 密码作为 URL userinfo 需要百分号编码
            let encoded = url::form_urlencoded::byte_serialize(password.as_bytes())
                .collect::<String>()
                .replace('+', "%20");
            format!(
                "redis://:{}@{}:{}/{}",
                encoded, self.host, self.port, self.database
            )
        } else {
            format!("redis://{}:{}/{}", self.host, self.port, self.database)
        }
    }

    /// 用于日志输出的连接地址（不包含密码）
    #[must_use]
    pub fn display_address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// HTTP 缓存中间件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    /// 读缓存默认 TTL（秒）
    pub default_ttl: u64,
    /// 是否在 `X-Cache-Key` 头中暴露原始缓存键（仅调试使用）
    pub expose_cache_key: bool,
    /// 可缓存响应体的最大字节数
    pub max_body_bytes: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            default_ttl: 300,
            expose_cache_key: false,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// 预热调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupConfig {
    /// 是否启用后台预热
    pub enabled: bool,
    /// 周期预热间隔（秒）
    pub interval_secs: u64,
    /// 进程启动后首次预热的延迟（秒）
    pub startup_delay_secs: u64,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30 * 60,
            startup_delay_secs: 5,
        }
    }
}

impl AppConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }

        let prefix = &self.cache.key_prefix;
        if prefix.is_empty() {
            return Err("cache.key_prefix cannot be empty".to_string());
        }
        if prefix.contains(['*', '?', '[', ']', ':']) {
            return Err(format!(
                "cache.key_prefix must not contain glob characters or ':' (got {prefix:?})"
            ));
        }

        if self.cache.cache_type == CacheType::Memory && self.cache.memory_max_entries == 0 {
            return Err("cache.memory_max_entries must be greater than 0".to_string());
        }

        if self.cache.cache_type == CacheType::Redis {
            let redis = &self.cache.redis;
            if redis.host.is_empty() {
                return Err("cache.redis.host cannot be empty".to_string());
            }
            if redis.port == 0 {
                return Err("cache.redis.port must be greater than 0".to_string());
            }
            if redis.connect_timeout_ms == 0 || redis.command_timeout_ms == 0 {
                return Err("cache.redis timeouts must be greater than 0".to_string());
            }
        }

        if self.cache.middleware.max_body_bytes == 0 {
            return Err("cache.middleware.max_body_bytes must be greater than 0".to_string());
        }

        if self.cache.warmup.enabled && self.cache.warmup.interval_secs == 0 {
            return Err("cache.warmup.interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.key_prefix, "loan");
        assert_eq!(config.cache.warmup.interval_secs, 1800);
    }

    #[test]
    fn display_address_omits_password() {
        let redis = RedisConfig {
            password: Some("s3cret".to_string()),
            database: 2,
            ..RedisConfig::default()
        };
        assert_eq!(redis.build_url(), "redis://:s3cret@127.0.0.1:6379/2");
        assert_eq!(redis.display_address(), "127.0.0.1:6379/2");
    }

    #[test]
    fn password_with_reserved_characters_is_encoded() {
        let redis = RedisConfig {
            password: Some("p@ss/w:rd +x".to_string()),
            ..RedisConfig::default()
        };
        let url = redis.build_url();
        assert_eq!(url, "redis://:p%40ss%2Fw%3Ard%20%2Bx@127.0.0.1:6379/0");

        let parsed = url::Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("127.0.0.1"));
        assert_eq!(parsed.port(), Some(6379));
        assert_eq!(parsed.path(), "/0");
    }

    #[test]
    fn prefix_with_glob_characters_is_rejected() {
        let mut config = AppConfig::default();
        config.cache.key_prefix = "loan*".to_string();
        assert!(config.validate().is_err());

        config.cache.key_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_warmup_interval_only_matters_when_enabled() {
        let mut config = AppConfig::default();
        config.cache.warmup.interval_secs = 0;
        assert!(config.validate().is_err());

        config.cache.warmup.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [cache]
            cache_type = "memory"
            key_prefix = "lending"

            [cache.redis]
            port = 6380
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.cache_type, CacheType::Memory);
        assert_eq!(config.cache.key_prefix, "lending");
        assert_eq!(config.cache.redis.port, 6380);
        assert_eq!(config.cache.redis.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert!(config.cache.enabled);
    }
}
