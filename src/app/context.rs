//! 应用上下文（DI 容器）
//!
//! 统一持有跨模块共享的缓存存储与预热器，中间件与管理接口都从这里取依赖。

use std::sync::Arc;

use crate::cache::{CacheStore, CacheWarmer, WarmupTask};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppContext {
    config: Arc<AppConfig>,
    store: Arc<CacheStore>,
    warmer: Arc<CacheWarmer>,
    warmup_tasks: Arc<[WarmupTask]>,
}

impl AppContext {
    /// 根据配置创建未连接的存储与预热器
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        let store = CacheStore::new(config.cache.clone());
        let warmer = Arc::new(CacheWarmer::new(Arc::clone(&store)));
        Self {
            config: Arc::new(config),
            store,
            warmer,
            warmup_tasks: Arc::from(Vec::<WarmupTask>::new()),
        }
    }

    /// 设置启动时注册的默认预热任务
    #[must_use]
    pub fn with_warmup_tasks(mut self, tasks: Vec<WarmupTask>) -> Self {
        self.warmup_tasks = Arc::from(tasks);
        self
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> Arc<CacheStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn warmer(&self) -> Arc<CacheWarmer> {
        Arc::clone(&self.warmer)
    }

    #[must_use]
    pub fn warmup_tasks(&self) -> &[WarmupTask] {
        &self.warmup_tasks
    }
}
