//! # 认证类型定义

use serde::{Deserialize, Serialize};

/// 已认证主体
///
/// 由外部授权层以 `request.extensions_mut().insert(ctx)` 的方式注入。
/// 主体的响应可能依赖身份、角色或所属区域，三者都会参与缓存键生成。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthContext {
    /// 主体唯一标识
    pub subject_id: String,
    /// 角色（例如 `admin`、`loan_officer`）
    pub role: Option<String>,
    /// 所属区域
    pub region: Option<String>,
}

impl AuthContext {
    #[must_use]
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            role: None,
            region: None,
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}
