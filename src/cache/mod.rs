//! # 缓存模块
//!
//! 读穿透缓存层：缓存存储、HTTP 缓存/失效中间件、预热调度

pub mod backend;
pub mod client;
pub mod keys;
pub mod middleware;
pub mod store;
pub mod strategies;
pub mod warmer;

pub use backend::{CacheBackend, MemoryBackend};
pub use client::RedisBackend;
pub use keys::{InvalidationContext, InvalidationRule, KeyGenerator, KeyParts, KeyStrategy};
pub use middleware::{
    CacheInvalidation, CachedResponse, ResponseCache, X_CACHE, X_CACHE_KEY, cache_response,
    invalidate_cache,
};
pub use store::{CacheStats, CacheStore, StoreState};
pub use strategies::{CacheCondition, CachePolicy, CacheTtl};
pub use warmer::{
    CacheWarmer, DataProvider, WarmupOutcome, WarmupReport, WarmupStatus, WarmupTask, provider_fn,
};
