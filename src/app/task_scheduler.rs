//! # 后台任务调度器
//!
//! 统一的任务注册、启动与停止，关闭时按注册的逆序执行停止逻辑。

use crate::app::tasks::TaskType;
use crate::error::{AppError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::{lerror, linfo, lwarn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type TaskAction = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// 调度任务定义
#[derive(Clone)]
pub struct ScheduledTask {
    task_type: TaskType,
    start: TaskAction,
    stop: Option<TaskAction>,
}

impl ScheduledTask {
    /// 创建任务构建器
    #[must_use]
    pub fn builder(task_type: TaskType) -> ScheduledTaskBuilder {
        ScheduledTaskBuilder {
            task_type,
            start: None,
            stop: None,
        }
    }

    /// 启动任务
    async fn start(&self) -> Result<()> {
        linfo!(
            "system",
            LogStage::BackgroundTask,
            LogComponent::ServerSetup,
            "task_start",
            "启动后台任务",
            task = ?self.task_type
        );
        (self.start)().await
    }

    /// 停止任务
    async fn stop(&self) -> Result<()> {
        if let Some(action) = &self.stop {
            linfo!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                "task_stop",
                "停止后台任务",
                task = ?self.task_type
            );
            action().await
        } else {
            lwarn!(
                "system",
                LogStage::Shutdown,
                LogComponent::ServerSetup,
                "task_stop_skipped",
                "后台任务未注册停止逻辑",
                task = ?self.task_type
            );
            Ok(())
        }
    }
}

/// 任务构建器
pub struct ScheduledTaskBuilder {
    task_type: TaskType,
    start: Option<TaskAction>,
    stop: Option<TaskAction>,
}

impl ScheduledTaskBuilder {
    /// 注册启动逻辑
    #[must_use]
    pub fn on_start<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.start = Some(Arc::new(move || Box::pin(action())));
        self
    }

    /// 注册停止逻辑
    #[must_use]
    pub fn on_stop<F, Fut>(mut self, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.stop = Some(Arc::new(move || Box::pin(action())));
        self
    }

    /// 构建最终任务，缺少启动逻辑时返回错误
    pub fn build(self) -> Result<ScheduledTask> {
        let start = self.start.ok_or_else(|| {
            crate::internal_error!("后台任务 {:?} 缺少启动逻辑", self.task_type)
        })?;
        Ok(ScheduledTask {
            task_type: self.task_type,
            start,
            stop: self.stop,
        })
    }
}

/// 后台任务调度器
///
/// 只有启动成功的任务才会在关闭时执行停止逻辑；关闭是幂等的。
#[derive(Default)]
pub struct TaskScheduler {
    registered: RwLock<Vec<ScheduledTask>>,
    running: Mutex<Vec<ScheduledTask>>,
}

impl TaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task: ScheduledTask) {
        self.registered.write().await.push(task);
    }

    pub async fn register_many(&self, tasks: Vec<ScheduledTask>) {
        self.registered.write().await.extend(tasks);
    }

    /// 已注册任务数量
    pub async fn len(&self) -> usize {
        self.registered.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registered.read().await.is_empty()
    }

    /// 按注册顺序启动；任一任务失败时回滚已启动的任务
    pub async fn start_all(&self) -> Result<()> {
        let pending = self.registered.read().await.clone();
        let mut running = self.running.lock().await;

        for task in pending {
            if let Err(err) = task.start().await {
                lerror!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::ServerSetup,
                    "task_start_failed",
                    "后台任务启动失败，回滚已启动的任务",
                    task = ?task.task_type,
                    error = %err
                );
                let started = std::mem::take(&mut *running);
                drop(running);
                Self::stop_in_reverse(started).await;
                return Err(err);
            }
            running.push(task);
        }
        Ok(())
    }

    /// 逆序停止所有已启动任务，单个失败不影响其余任务，返回第一个错误
    pub async fn shutdown(&self) -> Result<()> {
        let started = std::mem::take(&mut *self.running.lock().await);
        match Self::stop_in_reverse(started).await {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stop_in_reverse(tasks: Vec<ScheduledTask>) -> Option<AppError> {
        let mut first_error = None;
        for task in tasks.into_iter().rev() {
            if let Err(err) = task.stop().await {
                lerror!(
                    "system",
                    LogStage::Shutdown,
                    LogComponent::ServerSetup,
                    "task_stop_failed",
                    "后台任务停止失败",
                    task = ?task.task_type,
                    error = %err
                );
                first_error.get_or_insert(err);
            }
        }
        first_error
    }
}
