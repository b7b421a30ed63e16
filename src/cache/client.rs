//! # Redis 缓存客户端
//!
//! 提供 Redis 连接管理和基础操作，所有命令都受连接/命令超时约束

use std::future::Future;
use std::time::Duration;

use redis::{AsyncCommands, Client, RedisResult, aio::ConnectionManager};
use tokio::time::timeout;

use super::backend::BackendResult;
use crate::config::RedisConfig;
use crate::error::CacheError;
use crate::{ldebug, linfo, logging::{LogComponent, LogStage}};

/// 单次 SCAN 的建议批量，同时作为批量 DEL 的分片大小
pub const SCAN_BATCH_SIZE: usize = 500;

/// Redis 缓存客户端
#[derive(Clone)]
pub struct RedisBackend {
    /// Redis 连接管理器（内部自动重连）
    connection_manager: ConnectionManager,
    /// 单条命令超时
    command_timeout: Duration,
}

impl RedisBackend {
    /// 建立连接，超过 `connect_timeout_ms` 视为失败
    pub async fn connect(config: &RedisConfig) -> BackendResult<Self> {
        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Redis,
            "connect_to_redis",
            &format!("正在连接 Redis 服务器: {}", config.display_address())
        );

        let client = Client::open(config.build_url())?;
        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

        let connection_manager = timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::timeout("CONNECT", connect_timeout))??;

        let backend = Self {
            connection_manager,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        };
        backend.ping().await?;

        linfo!(
            "system",
            LogStage::Cache,
            LogComponent::Redis,
            "redis_connected",
            "Redis 连接建立成功"
        );
        Ok(backend)
    }

    /// 带命令超时地执行一次 Redis 调用
    async fn run<T, F>(&self, operation: &'static str, command: F) -> BackendResult<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        timeout(self.command_timeout, command)
            .await
            .map_err(|_| CacheError::timeout(operation, self.command_timeout))?
            .map_err(CacheError::from)
    }

    pub async fn get(&self, key: &str) -> BackendResult<Option<String>> {
        let mut conn = self.connection_manager.clone();
        self.run("GET", conn.get::<_, Option<String>>(key)).await
    }

    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> BackendResult<()> {
        let mut conn = self.connection_manager.clone();
        match ttl {
            Some(ttl) => {
                self.run("SETEX", conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)))
                    .await
            }
            None => self.run("SET", conn.set::<_, _, ()>(key, value)).await,
        }
    }

    pub async fn del(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.connection_manager.clone();
        let deleted: u64 = self.run("DEL", conn.del(key)).await?;
        Ok(deleted > 0)
    }

    /// 使用 SCAN 增量枚举匹配的键，避免 KEYS 阻塞服务端
    pub async fn scan(&self, pattern: &str) -> BackendResult<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE);

            let (next_cursor, batch): (u64, Vec<String>) =
                self.run("SCAN", cmd.query_async(&mut conn)).await?;
            keys.extend(batch);

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        // SCAN 可能重复返回同一个键
        keys.sort_unstable();
        keys.dedup();

        ldebug!(
            "system",
            LogStage::Cache,
            LogComponent::Redis,
            "scan_complete",
            &format!("SCAN 完成: pattern={}, matched={}", pattern, keys.len())
        );
        Ok(keys)
    }

    /// 分片批量删除
    pub async fn del_many(&self, keys: &[String]) -> BackendResult<u64> {
        let mut conn = self.connection_manager.clone();
        let mut deleted = 0u64;
        for chunk in keys.chunks(SCAN_BATCH_SIZE) {
            let count: u64 = self.run("DEL", conn.del(chunk)).await?;
            deleted += count;
        }
        Ok(deleted)
    }

    pub async fn exists(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.connection_manager.clone();
        self.run("EXISTS", conn.exists::<_, bool>(key)).await
    }

    pub async fn ttl(&self, key: &str) -> BackendResult<i64> {
        let mut conn = self.connection_manager.clone();
        self.run("TTL", conn.ttl::<_, i64>(key)).await
    }

    pub async fn incr(&self, key: &str, by: i64) -> BackendResult<i64> {
        let mut conn = self.connection_manager.clone();
        self.run("INCRBY", conn.incr::<_, _, i64>(key, by)).await
    }

    pub async fn dbsize(&self) -> BackendResult<u64> {
        let mut conn = self.connection_manager.clone();
        self.run("DBSIZE", redis::cmd("DBSIZE").query_async::<u64>(&mut conn))
            .await
    }

    /// 从 `INFO memory` 中提取 `used_memory_human`
    pub async fn used_memory_human(&self) -> BackendResult<String> {
        let mut conn = self.connection_manager.clone();
        let info: String = self
            .run(
                "INFO",
                redis::cmd("INFO").arg("memory").query_async::<String>(&mut conn),
            )
            .await?;

        parse_used_memory(&info)
            .ok_or_else(|| CacheError::unexpected_response("INFO memory 缺少 used_memory_human"))
    }

    /// 测试连接
    pub async fn ping(&self) -> BackendResult<()> {
        let mut conn = self.connection_manager.clone();
        let response: String = self
            .run("PING", redis::cmd("PING").query_async::<String>(&mut conn))
            .await?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(CacheError::unexpected_response(format!(
                "Redis ping 响应异常: {response}"
            )))
        }
    }
}

fn parse_used_memory(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("used_memory_human:"))
        .map(|value| value.trim().to_string())
}
