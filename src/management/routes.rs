//! # 路由配置
//!
//! 定义管理API路由

use axum::Router;
use axum::routing::{get, post};

use crate::management::handlers::{cache, health};
use crate::management::server::AppState;

/// 创建所有路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/cache", cache_routes())
        .with_state(state)
}

/// 缓存管理路由
fn cache_routes() -> Router<AppState> {
    Router::new()
        .route("/stats", get(cache::get_cache_stats))
        .route(
            "/warmup",
            get(cache::get_warmup_status).post(cache::trigger_warmup),
        )
        .route("/clear", post(cache::clear_cache))
}
