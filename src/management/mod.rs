//! # 管理API模块
//!
//! 缓存统计、按需预热、缓存清理与健康检查。调用权限由外部授权层把关。

pub mod handlers;
pub mod response;
pub mod routes;
pub mod server;

pub use routes::create_routes;
pub use server::{AppState, ManagementServer};
