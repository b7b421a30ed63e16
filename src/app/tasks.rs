//! # 后台任务注册
//!
//! 缓存连接与缓存预热两个生命周期任务

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::app::context::AppContext;
use crate::app::task_scheduler::{ScheduledTask, TaskScheduler};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, linfo};

/// 后台任务类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// 缓存存储连接生命周期
    CacheStore,
    /// 缓存预热（启动延迟 + 周期调度）
    CacheWarmup,
}

/// 后台任务集合：调度器及任务实例统一管理
pub struct AppTasks {
    scheduler: Arc<TaskScheduler>,
}

impl AppTasks {
    /// 初始化调度器并注册所有后台任务
    pub async fn initialize(context: &AppContext) -> Result<Arc<Self>> {
        let scheduler = Arc::new(TaskScheduler::new());

        let store = context.store();
        let mut tasks = vec![
            ScheduledTask::builder(TaskType::CacheStore)
                .on_start({
                    let store = Arc::clone(&store);
                    move || {
                        let store = Arc::clone(&store);
                        async move {
                            store.connect().await;
                            Ok(())
                        }
                    }
                })
                .on_stop({
                    let store = Arc::clone(&store);
                    move || {
                        let store = Arc::clone(&store);
                        async move {
                            store.disconnect().await;
                            Ok(())
                        }
                    }
                })
                .build()?,
        ];

        let warmup = context.config().cache.warmup.clone();
        if warmup.enabled {
            let warmer = context.warmer();
            let defaults = context.warmup_tasks().to_vec();
            let startup_delay = Duration::from_secs(warmup.startup_delay_secs);
            let period = Duration::from_secs(warmup.interval_secs);
            let pending: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();

            tasks.push(
                ScheduledTask::builder(TaskType::CacheWarmup)
                    .on_start({
                        let warmer = Arc::clone(&warmer);
                        let store = Arc::clone(&store);
                        let pending = Arc::clone(&pending);
                        move || {
                            let warmer = Arc::clone(&warmer);
                            let store = Arc::clone(&store);
                            let pending = Arc::clone(&pending);
                            let defaults = defaults.clone();
                            async move {
                                // 首次预热延后执行，并等到存储可用后再开始
                                let handle = tokio::spawn(async move {
                                    tokio::time::sleep(startup_delay).await;
                                    if !store.wait_until_connected().await {
                                        ldebug!(
                                            "system",
                                            LogStage::Warmup,
                                            LogComponent::CacheWarmer,
                                            "warmup_skipped",
                                            "缓存已禁用，跳过预热"
                                        );
                                        return;
                                    }
                                    warmer.initialize(defaults, period).await;
                                });
                                if let Some(previous) = pending
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .replace(handle)
                                {
                                    previous.abort();
                                }
                                Ok(())
                            }
                        }
                    })
                    .on_stop(move || {
                        let warmer = Arc::clone(&warmer);
                        let pending = Arc::clone(&pending);
                        async move {
                            if let Some(handle) = pending
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .take()
                            {
                                handle.abort();
                            }
                            warmer.stop();
                            Ok(())
                        }
                    })
                    .build()?,
            );
        } else {
            ldebug!(
                "system",
                LogStage::Startup,
                LogComponent::CacheWarmer,
                "warmup_disabled",
                "缓存预热已通过配置关闭"
            );
        }

        scheduler.register_many(tasks).await;
        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::ServerSetup,
            "tasks_registered",
            "后台任务注册完成"
        );

        Ok(Arc::new(Self { scheduler }))
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<TaskScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start_all().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.shutdown().await
    }
}
