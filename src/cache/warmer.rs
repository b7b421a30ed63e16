//! # 缓存预热
//!
//! 维护 `(key, provider, ttl)` 任务表，按需或按固定周期并发执行，
//! 把昂贵的聚合视图提前写入缓存存储。
//!
//! 同一时刻只允许一个预热周期运行，重入的触发会被直接跳过。

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::store::CacheStore;
use crate::{ldebug, lerror, linfo, lwarn, logging::{LogComponent, LogStage}};

/// 数据提供者：无参、只读、幂等的异步计算
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Value>;
}

type BoxedFetch = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// 将异步闭包包装为 [`DataProvider`]
pub struct FnProvider<F> {
    fetch: F,
}

impl<F> FnProvider<F>
where
    F: Fn() -> BoxedFetch + Send + Sync,
{
    pub const fn new(fetch: F) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl<F> DataProvider for FnProvider<F>
where
    F: Fn() -> BoxedFetch + Send + Sync,
{
    async fn fetch(&self) -> anyhow::Result<Value> {
        (self.fetch)().await
    }
}

/// 由异步函数构造提供者
pub fn provider_fn<F, Fut>(fetch: F) -> Arc<dyn DataProvider>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnProvider::new(move || -> BoxedFetch { Box::pin(fetch()) }))
}

/// 预热任务
#[derive(Clone)]
pub struct WarmupTask {
    pub key: String,
    pub provider: Arc<dyn DataProvider>,
    /// 写入时使用的 TTL（秒），`<= 0` 表示永不过期
    pub ttl: i64,
}

impl WarmupTask {
    pub fn new(key: impl Into<String>, provider: Arc<dyn DataProvider>, ttl: i64) -> Self {
        Self {
            key: key.into(),
            provider,
            ttl,
        }
    }
}

impl fmt::Debug for WarmupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupTask")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// 单个预热周期的汇总
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// 预热触发结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WarmupOutcome {
    /// 已有预热在运行，本次被跳过
    AlreadyRunning,
    Completed(WarmupReport),
}

/// 预热状态
#[derive(Debug, Clone, Serialize)]
pub struct WarmupStatus {
    pub is_warming: bool,
    pub last_warmup_time: Option<DateTime<Utc>>,
    pub has_scheduled_interval: bool,
    pub total_tasks: usize,
    pub task_keys: Vec<String>,
}

/// 释放预热标志
struct WarmingGuard<'a>(&'a AtomicBool);

impl Drop for WarmingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 缓存预热器
pub struct CacheWarmer {
    store: Arc<CacheStore>,
    tasks: RwLock<HashMap<String, WarmupTask>>,
    is_warming: AtomicBool,
    last_warmup_time: Mutex<Option<DateTime<Utc>>>,
    schedule: Mutex<Option<JoinHandle<()>>>,
}

impl CacheWarmer {
    #[must_use]
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            tasks: RwLock::new(HashMap::new()),
            is_warming: AtomicBool::new(false),
            last_warmup_time: Mutex::new(None),
            schedule: Mutex::new(None),
        }
    }

    /// 注册任务；同一个 key 以最后一次注册为准
    pub async fn add_task(&self, task: WarmupTask) {
        let mut tasks = self.tasks.write().await;
        if tasks.insert(task.key.clone(), task).is_some() {
            ldebug!(
                "system",
                LogStage::Warmup,
                LogComponent::CacheWarmer,
                "task_replaced",
                "预热任务被重新注册，使用最新的定义"
            );
        }
    }

    /// 执行全部任务
    pub async fn perform_warmup(&self) -> WarmupOutcome {
        let Some(_guard) = self.try_begin() else {
            return self.skipped("perform_warmup");
        };

        let tasks: Vec<WarmupTask> = self.tasks.read().await.values().cloned().collect();
        let report = self.run_tasks(tasks).await;
        self.record_completion();

        linfo!(
            "system",
            LogStage::Warmup,
            LogComponent::CacheWarmer,
            "warmup_complete",
            &format!(
                "缓存预热完成: 成功 {}/{}，失败 {}，耗时 {}ms",
                report.succeeded, report.total, report.failed, report.elapsed_ms
            )
        );
        WarmupOutcome::Completed(report)
    }

    /// 只执行指定 key 的任务，未知 key 会被记录并忽略
    pub async fn warm_specific_keys(&self, keys: &[String]) -> WarmupOutcome {
        let Some(_guard) = self.try_begin() else {
            return self.skipped("warm_specific_keys");
        };

        let tasks: Vec<WarmupTask> = {
            let registered = self.tasks.read().await;
            keys.iter()
                .filter_map(|key| {
                    let task = registered.get(key).cloned();
                    if task.is_none() {
                        lwarn!(
                            "system",
                            LogStage::Warmup,
                            LogComponent::CacheWarmer,
                            "no_matching_task",
                            "没有匹配的预热任务",
                            key = %key
                        );
                    }
                    task
                })
                .collect()
        };

        let report = self.run_tasks(tasks).await;
        self.record_completion();

        linfo!(
            "system",
            LogStage::Warmup,
            LogComponent::CacheWarmer,
            "partial_warmup_complete",
            &format!(
                "指定键预热完成: 成功 {}/{}，失败 {}，耗时 {}ms",
                report.succeeded, report.total, report.failed, report.elapsed_ms
            )
        );
        WarmupOutcome::Completed(report)
    }

    /// 启动周期预热，重复调用会替换之前的定时器
    pub fn schedule_periodic_warmup(self: &Arc<Self>, period: Duration) {
        let warmer = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(warmer) = warmer.upgrade() else {
                    break;
                };
                warmer.perform_warmup().await;
            }
        });

        let previous = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }

        linfo!(
            "system",
            LogStage::Warmup,
            LogComponent::CacheWarmer,
            "schedule_armed",
            &format!("周期预热已启动: interval={}s", period.as_secs())
        );
    }

    /// 注册默认任务、预热一次并启动周期预热；缓存未连接时直接跳过
    pub async fn initialize(self: &Arc<Self>, defaults: Vec<WarmupTask>, period: Duration) {
        if !self.store.is_connected() {
            lwarn!(
                "system",
                LogStage::Warmup,
                LogComponent::CacheWarmer,
                "initialize_skipped",
                "缓存未连接，跳过预热初始化"
            );
            return;
        }

        for task in defaults {
            self.add_task(task).await;
        }
        self.perform_warmup().await;
        self.schedule_periodic_warmup(period);
    }

    pub async fn get_status(&self) -> WarmupStatus {
        let mut task_keys: Vec<String> = self.tasks.read().await.keys().cloned().collect();
        task_keys.sort();

        WarmupStatus {
            is_warming: self.is_warming.load(Ordering::SeqCst),
            last_warmup_time: *self
                .last_warmup_time
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            has_scheduled_interval: self
                .schedule
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_some_and(|handle| !handle.is_finished()),
            total_tasks: task_keys.len(),
            task_keys,
        }
    }

    /// 停止周期预热（幂等）
    pub fn stop(&self) {
        let handle = self
            .schedule
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::CacheWarmer,
                "schedule_stopped",
                "周期预热已停止"
            );
        }
    }

    fn try_begin(&self) -> Option<WarmingGuard<'_>> {
        self.is_warming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| WarmingGuard(&self.is_warming))
    }

    fn skipped(&self, operation: &'static str) -> WarmupOutcome {
        ldebug!(
            "system",
            LogStage::Warmup,
            LogComponent::CacheWarmer,
            operation,
            "预热正在进行，本次触发被跳过"
        );
        WarmupOutcome::AlreadyRunning
    }

    fn record_completion(&self) {
        *self
            .last_warmup_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// 并发执行任务；每个任务独立 spawn，单个任务失败或 panic 不影响其他任务
    async fn run_tasks(&self, tasks: Vec<WarmupTask>) -> WarmupReport {
        let started = Instant::now();
        let total = tasks.len();

        let handles = tasks.into_iter().map(|task| {
            let store = Arc::clone(&self.store);
            let key = task.key.clone();
            let handle = tokio::spawn(async move { run_task(&store, &task).await });
            async move { (key, handle.await) }
        });

        let mut succeeded = 0;
        for (key, result) in join_all(handles).await {
            match result {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(err) => lerror!(
                    "system",
                    LogStage::Warmup,
                    LogComponent::CacheWarmer,
                    "task_panicked",
                    "预热任务异常终止",
                    key = %key,
                    error = %err
                ),
            }
        }

        WarmupReport {
            total,
            succeeded,
            failed: total - succeeded,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Drop for CacheWarmer {
    fn drop(&mut self) {
        if let Some(handle) = self
            .schedule
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

async fn run_task(store: &CacheStore, task: &WarmupTask) -> bool {
    match task.provider.fetch().await {
        Ok(value) => {
            let stored = store.set_with_ttl(&task.key, &value, task.ttl).await;
            if !stored {
                lwarn!(
                    "system",
                    LogStage::Warmup,
                    LogComponent::CacheWarmer,
                    "task_store_failed",
                    "预热结果写入缓存失败",
                    key = %task.key
                );
            }
            stored
        }
        Err(err) => {
            lerror!(
                "system",
                LogStage::Warmup,
                LogComponent::CacheWarmer,
                "task_failed",
                "预热任务执行失败",
                key = %task.key,
                error = %err
            );
            false
        }
    }
}
