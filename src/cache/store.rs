//! # 缓存存储
//!
//! 面向业务的缓存入口：命名空间、降级模式、命中统计。
//!
//! 所有操作都不会向调用方返回错误。后端不可用时读操作视为未命中，
//! 写操作返回 `false`，批量删除返回 `0`。连接错误只在状态切换时记录一次。

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::backend::{BackendResult, CacheBackend, TTL_MISSING};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::{ldebug, lerror, linfo, lwarn, logging::{LogComponent, LogStage}};

/// 存储连接状态
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreState {
    /// 尚未连接或已主动断开
    Disconnected = 0,
    Connected = 1,
    /// 后端不可用，缓存退化为空操作
    Degraded = 2,
    /// 配置显式关闭
    Disabled = 3,
}

impl StoreState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Degraded,
            3 => Self::Disabled,
            _ => Self::Disconnected,
        }
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub connected: bool,
    pub key_count: u64,
    pub memory_usage: String,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
}

/// 缓存存储
pub struct CacheStore {
    config: CacheConfig,
    backend: RwLock<Option<CacheBackend>>,
    state: AtomicU8,
    state_tx: watch::Sender<StoreState>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    self_ref: Weak<Self>,
}

impl CacheStore {
    /// 创建未连接的存储实例
    #[must_use]
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            config,
            backend: RwLock::new(None),
            state: AtomicU8::new(StoreState::Disconnected as u8),
            state_tx: watch::Sender::new(StoreState::Disconnected),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            reconnect_task: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// 建立后端连接
    ///
    /// 失败时进入降级状态并按 `reconnect_interval_secs` 后台重试，不会返回错误。
    pub async fn connect(&self) {
        if !self.config.enabled {
            self.set_state(StoreState::Disabled);
            linfo!(
                "system",
                LogStage::Startup,
                LogComponent::CacheStore,
                "cache_disabled",
                "缓存已通过配置禁用，所有缓存操作将被跳过"
            );
            return;
        }

        if self.state() == StoreState::Connected {
            return;
        }

        match CacheBackend::connect(&self.config).await {
            Ok(backend) => {
                let kind = backend.kind();
                self.install_backend(backend);
                self.set_state(StoreState::Connected);
                linfo!(
                    "system",
                    LogStage::Startup,
                    LogComponent::CacheStore,
                    "cache_connected",
                    &format!("缓存后端已连接: type={}, prefix={}", kind, self.config.key_prefix)
                );
            }
            Err(err) => {
                self.set_state(StoreState::Disconnected);
                self.enter_degraded("connect", &err);
            }
        }
    }

    /// 主动断开连接（幂等）
    pub async fn disconnect(&self) {
        if let Some(handle) = self
            .reconnect_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let previous = self
            .backend
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let was = StoreState::from_u8(
            self.state
                .swap(StoreState::Disconnected as u8, Ordering::SeqCst),
        );
        self.publish_state();

        if previous.is_some() || was == StoreState::Degraded {
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::CacheStore,
                "cache_disconnected",
                "缓存连接已关闭"
            );
        }
    }

    /// 当前状态
    #[must_use]
    pub fn state(&self) -> StoreState {
        StoreState::from_u8(self.state.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == StoreState::Connected
    }

    /// 等待存储进入可用状态
    ///
    /// 连接成功（含降级后恢复）返回 `true`；缓存被禁用时立即返回 `false`。
    pub async fn wait_until_connected(&self) -> bool {
        let mut rx = self.state_tx.subscribe();
        let reached = rx
            .wait_for(|state| matches!(state, StoreState::Connected | StoreState::Disabled))
            .await
            .map(|state| *state == StoreState::Connected);
        reached.unwrap_or(false)
    }

    /// 缓存配置
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// 键命名空间前缀
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    /// 读取并反序列化
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.state() == StoreState::Disabled {
            return None;
        }

        let full_key = self.namespaced(key);
        let raw = self
            .call("get", key, |backend| async move { backend.get(&full_key).await })
            .await
            .flatten();

        let value = raw.and_then(|raw| match serde_json::from_str::<T>(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::CacheStore,
                    "deserialize_failed",
                    &format!("缓存值反序列化失败，按未命中处理: key={key}"),
                    error = %err
                );
                None
            }
        });

        if value.is_some() {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// 使用默认 TTL 写入
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let ttl = i64::try_from(self.config.default_ttl).unwrap_or(i64::MAX);
        self.set_with_ttl(key, value, ttl).await
    }

    /// 写入并指定 TTL（秒），`ttl <= 0` 表示永不过期
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: i64) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(err) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::CacheStore,
                    "serialize_failed",
                    &format!("缓存值序列化失败: key={key}"),
                    error = %err
                );
                return false;
            }
        };

        let ttl = u64::try_from(ttl)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let full_key = self.namespaced(key);

        self.call("set", key, |backend| async move {
            backend.set(&full_key, serialized, ttl).await
        })
        .await
        .is_some()
    }

    /// 删除单个键，返回键是否存在
    pub async fn del(&self, key: &str) -> bool {
        let full_key = self.namespaced(key);
        self.call("del", key, |backend| async move { backend.del(&full_key).await })
            .await
            .unwrap_or(false)
    }

    /// 按 glob 模式批量删除（模式自动加命名空间前缀）
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        self.delete_matching(pattern).await.unwrap_or(0)
    }

    pub async fn exists(&self, key: &str) -> bool {
        let full_key = self.namespaced(key);
        self.call("exists", key, |backend| async move { backend.exists(&full_key).await })
            .await
            .unwrap_or(false)
    }

    /// 剩余存活秒数：`-1` 永不过期，`-2` 键不存在（降级时同样返回 `-2`）
    pub async fn ttl(&self, key: &str) -> i64 {
        let full_key = self.namespaced(key);
        self.call("ttl", key, |backend| async move { backend.ttl(&full_key).await })
            .await
            .unwrap_or(TTL_MISSING)
    }

    pub async fn incr(&self, key: &str, by: i64) -> Option<i64> {
        let full_key = self.namespaced(key);
        self.call("incr", key, |backend| async move { backend.incr(&full_key, by).await })
            .await
    }

    /// 统计信息（尽力而为）
    pub async fn get_stats(&self) -> CacheStats {
        let hit_count = self.hit_count.load(Ordering::Relaxed);
        let miss_count = self.miss_count.load(Ordering::Relaxed);
        let total = hit_count + miss_count;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hit_count as f64 / total as f64
        };

        let mut stats = CacheStats {
            connected: false,
            key_count: 0,
            memory_usage: "0B".to_string(),
            hit_count,
            miss_count,
            hit_rate,
        };

        if !self.is_connected() {
            return stats;
        }

        let key_count = self
            .call("dbsize", "*", |backend| async move { backend.key_count().await })
            .await;
        let memory_usage = self
            .call("info", "*", |backend| async move { backend.memory_usage().await })
            .await;

        stats.connected = self.is_connected();
        stats.key_count = key_count.unwrap_or(0);
        if let Some(memory_usage) = memory_usage {
            stats.memory_usage = memory_usage;
        }
        stats
    }

    /// 清空本命名空间下的全部键
    pub async fn flush(&self) -> bool {
        self.clear_namespace().await.is_some()
    }

    /// 清空本命名空间，返回删除数量；缓存不可用时返回 `None`
    pub async fn clear_namespace(&self) -> Option<u64> {
        match self.delete_matching("*").await {
            Some(removed) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::CacheStore,
                    "flush",
                    &format!("缓存命名空间已清空: prefix={}, removed={}", self.config.key_prefix, removed)
                );
                Some(removed)
            }
            None => None,
        }
    }

    async fn delete_matching(&self, pattern: &str) -> Option<u64> {
        let full_pattern = self.namespaced(pattern);
        let keys = self
            .call("scan", pattern, |backend| async move { backend.keys(&full_pattern).await })
            .await?;

        if keys.is_empty() {
            ldebug!(
                "system",
                LogStage::Invalidation,
                LogComponent::CacheStore,
                "no_matching_keys",
                &format!("没有找到匹配的缓存键: {pattern}")
            );
            return Some(0);
        }

        let removed = self
            .call("del_pattern", pattern, |backend| async move {
                backend.del_many(&keys).await
            })
            .await?;

        ldebug!(
            "system",
            LogStage::Invalidation,
            LogComponent::CacheStore,
            "del_pattern",
            &format!("批量删除缓存完成: pattern={pattern}, deleted={removed}")
        );
        Some(removed)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    fn set_state(&self, state: StoreState) {
        self.state.store(state as u8, Ordering::SeqCst);
        self.publish_state();
    }

    /// 把原子状态同步给订阅者；每次切换后都以原子值为准重新发布
    fn publish_state(&self) {
        self.state_tx.send_replace(self.state());
    }

    fn backend_snapshot(&self) -> Option<CacheBackend> {
        self.backend
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install_backend(&self, backend: CacheBackend) {
        *self.backend.write().unwrap_or_else(PoisonError::into_inner) = Some(backend);
    }

    /// 在后端快照上执行一次操作，把错误折叠为 `None`
    async fn call<T, F, Fut>(&self, operation: &'static str, key: &str, op: F) -> Option<T>
    where
        F: FnOnce(CacheBackend) -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        if matches!(self.state(), StoreState::Disabled | StoreState::Disconnected) {
            return None;
        }
        let backend = self.backend_snapshot()?;

        match op(backend).await {
            Ok(value) => {
                self.mark_recovered();
                Some(value)
            }
            Err(err) if err.is_connection_failure() => {
                self.enter_degraded(operation, &err);
                None
            }
            Err(err) => {
                lwarn!(
                    "system",
                    LogStage::Cache,
                    LogComponent::CacheStore,
                    operation,
                    &format!("缓存操作失败: key={key}"),
                    error = %err
                );
                None
            }
        }
    }

    /// 切换到降级状态；只有真正发生切换的那一次会记录错误日志
    fn enter_degraded(&self, operation: &'static str, err: &CacheError) {
        let switched = [StoreState::Connected, StoreState::Disconnected]
            .into_iter()
            .any(|from| {
                self.state
                    .compare_exchange(
                        from as u8,
                        StoreState::Degraded as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
            });

        if switched {
            self.publish_state();
            lerror!(
                "system",
                LogStage::Cache,
                LogComponent::CacheStore,
                operation,
                "缓存后端不可用，进入降级模式（缓存操作将被跳过）",
                error = %err
            );
            self.spawn_reconnect();
        } else {
            ldebug!(
                "system",
                LogStage::Cache,
                LogComponent::CacheStore,
                operation,
                "缓存后端仍不可用",
                error = %err
            );
        }
    }

    fn mark_recovered(&self) {
        if self
            .state
            .compare_exchange(
                StoreState::Degraded as u8,
                StoreState::Connected as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.publish_state();
            linfo!(
                "system",
                LogStage::Cache,
                LogComponent::CacheStore,
                "cache_recovered",
                "缓存后端已恢复"
            );
        }
    }

    fn spawn_reconnect(&self) {
        let interval_secs = self.config.reconnect_interval_secs;
        if interval_secs == 0 {
            return;
        }

        let mut task = self
            .reconnect_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        lwarn!(
            "system",
            LogStage::BackgroundTask,
            LogComponent::CacheStore,
            "reconnect_scheduled",
            &format!("缓存后台重连已启动: interval={interval_secs}s")
        );
        *task = Some(tokio::spawn(reconnect_loop(
            self.self_ref.clone(),
            Duration::from_secs(interval_secs),
        )));
    }

    /// 尝试恢复连接，成功返回 `true`
    async fn try_reconnect(&self) -> bool {
        if let Some(backend) = self.backend_snapshot() {
            return match backend.ping().await {
                Ok(()) => {
                    self.mark_recovered();
                    true
                }
                Err(err) => {
                    ldebug!(
                        "system",
                        LogStage::BackgroundTask,
                        LogComponent::CacheStore,
                        "reconnect_attempt",
                        "缓存后端仍不可用",
                        error = %err
                    );
                    false
                }
            };
        }

        match CacheBackend::connect(&self.config).await {
            Ok(backend) => {
                let mut slot = self.backend.write().unwrap_or_else(PoisonError::into_inner);
                if self.state() != StoreState::Degraded {
                    return true;
                }
                *slot = Some(backend);
                drop(slot);
                self.mark_recovered();
                true
            }
            Err(err) => {
                ldebug!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::CacheStore,
                    "reconnect_attempt",
                    "缓存后端重连失败",
                    error = %err
                );
                false
            }
        }
    }
}

async fn reconnect_loop(store: Weak<CacheStore>, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else {
            break;
        };
        if store.state() != StoreState::Degraded || store.try_reconnect().await {
            break;
        }
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Some(handle) = self
            .reconnect_task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
