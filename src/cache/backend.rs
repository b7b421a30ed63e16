//! # 缓存后端
//!
//! 统一的后端分发枚举：进程内 TTL 表与 Redis。
//! 后端只处理已序列化的字符串值，命名空间与降级逻辑由 `CacheStore` 负责。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;

use super::client::RedisBackend;
use crate::config::{CacheConfig, CacheType};
use crate::error::CacheError;

/// 后端操作结果
pub type BackendResult<T> = std::result::Result<T, CacheError>;

/// 键不存在时 TTL 查询的返回值
pub const TTL_MISSING: i64 = -2;
/// 键存在但未设置过期时间时 TTL 查询的返回值
pub const TTL_PERSISTENT: i64 = -1;

/// 缓存后端枚举 - 避免 trait object 与泛型方法的兼容性问题
#[derive(Clone)]
pub enum CacheBackend {
    Memory(MemoryBackend),
    Redis(RedisBackend),
}

impl CacheBackend {
    /// 根据配置建立后端连接
    pub async fn connect(config: &CacheConfig) -> BackendResult<Self> {
        match config.cache_type {
            CacheType::Memory => Ok(Self::Memory(MemoryBackend::new(config.memory_max_entries))),
            CacheType::Redis => Ok(Self::Redis(RedisBackend::connect(&config.redis).await?)),
        }
    }

    /// 后端类型名称（用于日志与统计）
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }

    pub async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        match self {
            Self::Memory(backend) => backend.get(key),
            Self::Redis(backend) => backend.get(key).await,
        }
    }

    /// 写入值，`ttl` 为 `None` 时永不过期
    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        match self {
            Self::Memory(backend) => backend.set(key, value, ttl),
            Self::Redis(backend) => backend.set(key, value, ttl).await,
        }
    }

    pub async fn del(&self, key: &str) -> BackendResult<bool> {
        match self {
            Self::Memory(backend) => backend.del(key),
            Self::Redis(backend) => backend.del(key).await,
        }
    }

    /// 枚举匹配 glob 模式的全部键
    pub async fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        match self {
            Self::Memory(backend) => backend.keys(pattern),
            Self::Redis(backend) => backend.scan(pattern).await,
        }
    }

    /// 批量删除，返回实际删除的数量
    pub async fn del_many(&self, keys: &[String]) -> BackendResult<u64> {
        match self {
            Self::Memory(backend) => backend.del_many(keys),
            Self::Redis(backend) => backend.del_many(keys).await,
        }
    }

    pub async fn exists(&self, key: &str) -> BackendResult<bool> {
        match self {
            Self::Memory(backend) => backend.exists(key),
            Self::Redis(backend) => backend.exists(key).await,
        }
    }

    /// 剩余存活秒数，`-1` 表示永不过期，`-2` 表示键不存在
    pub async fn ttl(&self, key: &str) -> BackendResult<i64> {
        match self {
            Self::Memory(backend) => backend.ttl(key),
            Self::Redis(backend) => backend.ttl(key).await,
        }
    }

    pub async fn incr(&self, key: &str, by: i64) -> BackendResult<i64> {
        match self {
            Self::Memory(backend) => backend.incr(key, by),
            Self::Redis(backend) => backend.incr(key, by).await,
        }
    }

    /// 后端中的键总数
    pub async fn key_count(&self) -> BackendResult<u64> {
        match self {
            Self::Memory(backend) => Ok(backend.key_count()),
            Self::Redis(backend) => backend.dbsize().await,
        }
    }

    /// 人类可读的内存占用
    pub async fn memory_usage(&self) -> BackendResult<String> {
        match self {
            Self::Memory(backend) => Ok(backend.memory_usage()),
            Self::Redis(backend) => backend.used_memory_human().await,
        }
    }

    pub async fn ping(&self) -> BackendResult<()> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Redis(backend) => backend.ping().await,
        }
    }
}

/// 内存缓存条目
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// 进程内缓存实现
///
/// 语义对齐 Redis：TTL 约定、glob 匹配、INCRBY 对非整数值报错。
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<Mutex<HashMap<String, MemoryEntry>>>,
    max_entries: usize,
}

impl MemoryBackend {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 读取时顺带清理已过期的条目
    fn live_entry<'a>(
        data: &'a mut HashMap<String, MemoryEntry>,
        key: &str,
    ) -> Option<&'a mut MemoryEntry> {
        let now = Instant::now();
        if data.get(key).is_some_and(|entry| entry.is_expired(now)) {
            data.remove(key);
            return None;
        }
        data.get_mut(key)
    }

    fn ensure_capacity(&self, data: &mut HashMap<String, MemoryEntry>) {
        if data.len() < self.max_entries {
            return;
        }

        let now = Instant::now();
        data.retain(|_, entry| !entry.is_expired(now));

        // 没有过期项时移除任意一项
        if data.len() >= self.max_entries
            && let Some(key) = data.keys().next().cloned()
        {
            data.remove(&key);
        }
    }

    pub fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let mut data = self.lock();
        Ok(Self::live_entry(&mut data, key).map(|entry| entry.value.clone()))
    }

    pub fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        let mut data = self.lock();
        if !data.contains_key(key) {
            self.ensure_capacity(&mut data);
        }
        data.insert(key.to_string(), MemoryEntry::new(value, ttl));
        Ok(())
    }

    pub fn del(&self, key: &str) -> BackendResult<bool> {
        let mut data = self.lock();
        let existed = Self::live_entry(&mut data, key).is_some();
        data.remove(key);
        Ok(existed)
    }

    pub fn keys(&self, pattern: &str) -> BackendResult<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let data = self.lock();
        Ok(data
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    pub fn del_many(&self, keys: &[String]) -> BackendResult<u64> {
        let mut data = self.lock();
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| data.remove(key))
            .filter(|entry| !entry.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    pub fn exists(&self, key: &str) -> BackendResult<bool> {
        let mut data = self.lock();
        Ok(Self::live_entry(&mut data, key).is_some())
    }

    pub fn ttl(&self, key: &str) -> BackendResult<i64> {
        let mut data = self.lock();
        let Some(entry) = Self::live_entry(&mut data, key) else {
            return Ok(TTL_MISSING);
        };
        Ok(entry.expires_at.map_or(TTL_PERSISTENT, |expires_at| {
            let remaining = expires_at.saturating_duration_since(Instant::now());
            // 与 Redis 一致：按毫秒四舍五入到秒
            i64::try_from((remaining.as_millis() + 500) / 1000).unwrap_or(i64::MAX)
        }))
    }

    pub fn incr(&self, key: &str, by: i64) -> BackendResult<i64> {
        let mut data = self.lock();
        let (current, expires_at) = match Self::live_entry(&mut data, key) {
            Some(entry) => {
                let current = entry.value.parse::<i64>().map_err(|_| {
                    CacheError::operation("value is not an integer or out of range")
                })?;
                (current, entry.expires_at)
            }
            None => {
                self.ensure_capacity(&mut data);
                (0, None)
            }
        };

        let next = current
            .checked_add(by)
            .ok_or_else(|| CacheError::operation("increment or decrement would overflow"))?;
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    pub fn key_count(&self) -> u64 {
        let now = Instant::now();
        let data = self.lock();
        data.values().filter(|entry| !entry.is_expired(now)).count() as u64
    }

    pub fn memory_usage(&self) -> String {
        let data = self.lock();
        let bytes: usize = data
            .iter()
            .map(|(key, entry)| key.len() + entry.value.len())
            .sum();
        format_bytes(bytes as u64)
    }
}

/// 将 Redis 风格的 glob 模式转换为锚定的正则表达式
///
/// 支持 `*`、`?`、`[...]`（`^` 取反）以及 `\` 转义。
fn glob_to_regex(pattern: &str) -> BackendResult<Regex> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 6);
    regex.push_str("(?s)^");

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    regex.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            '[' => {
                regex.push('[');
                let mut first = true;
                for class_char in chars.by_ref() {
                    match class_char {
                        ']' => break,
                        '^' if first => regex.push('^'),
                        '-' => regex.push('-'),
                        other => regex.push_str(&regex::escape(&other.to_string())),
                    }
                    first = false;
                }
                regex.push(']');
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|e| CacheError::operation(format!("无效的键模式 {pattern}: {e}")))
}

/// 以 Redis `used_memory_human` 的格式输出字节数
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "K", "M", "G"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.2}{}", UNITS[unit])
    }
}
