//! # 认证上下文
//!
//! 认证与权限校验由外部授权层完成，本模块只定义它写入请求扩展的身份信息。
//! 缓存键生成器读取该扩展来区分不同主体的响应。

pub mod types;

pub use types::AuthContext;
