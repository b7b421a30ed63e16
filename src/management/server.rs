//! # 管理服务器
//!
//! Axum HTTP服务器：管理路由 + 业务路由，统一挂载请求追踪

use std::future::Future;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::app::context::AppContext;
use crate::error::{AppError, Result};
use crate::linfo;
use crate::logging::{LogComponent, LogStage};

/// 管理服务器应用状态
#[derive(Clone)]
pub struct AppState {
    context: Arc<AppContext>,
}

impl AppState {
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    #[must_use]
    pub const fn context_arc(&self) -> &Arc<AppContext> {
        &self.context
    }
}

impl Deref for AppState {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

/// 管理服务器
pub struct ManagementServer {
    addr: SocketAddr,
    router: Router,
}

impl ManagementServer {
    /// 创建服务器，`api` 为业务路由（其读写路由各自挂载缓存中间件）
    pub fn new(context: Arc<AppContext>, api: Router) -> Result<Self> {
        let server = &context.config().server;
        let ip = server.bind_address.parse::<std::net::IpAddr>().map_err(|e| {
            AppError::server_init_with_source(
                format!("无效的监听地址 '{}'", server.bind_address),
                e,
            )
        })?;
        let addr = SocketAddr::new(ip, server.port);

        let router = Self::create_router(AppState::new(context), api);
        Ok(Self { addr, router })
    }

    /// 创建路由器
    pub fn create_router(state: AppState, api: Router) -> Router {
        super::routes::create_routes(state)
            .merge(api)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// 获取绑定地址
    #[must_use]
    pub const fn bind_address(&self) -> SocketAddr {
        self.addr
    }

    /// 启动服务器，`shutdown` 完成后优雅退出
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
            AppError::server_start_with_source(format!("绑定端口失败: {}", self.addr), e)
        })?;

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::ServerSetup,
            "server_start",
            &format!("HTTP 服务已启动: {}", self.addr)
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::server_start_with_source("HTTP 服务异常退出", e))?;

        Ok(())
    }
}
