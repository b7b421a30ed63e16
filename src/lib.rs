//! # Loan Cache Library
//!
//! 贷款业务后端的读缓存层：Redis 缓存存储、HTTP 缓存中间件、缓存预热调度

pub mod app;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod management;

// Re-export commonly used types
pub use app::AppContext;
pub use cache::{CacheStore, CacheWarmer};
pub use config::AppConfig;
pub use error::{AppError, Result};
