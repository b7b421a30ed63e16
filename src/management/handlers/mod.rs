//! 管理接口处理器

pub mod cache;
pub mod health;
