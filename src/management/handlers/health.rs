//! 健康检查相关处理器

use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::StoreState;
use crate::management::{response, server::AppState};

/// 健康检查结果
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    /// 缓存不可用时服务仍然可用（降级为无缓存）
    pub cache: StoreState,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    response::success(HealthStatus {
        status: "ok",
        cache: state.store().state(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}
