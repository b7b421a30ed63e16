//! # Loan Cache 主程序
//!
//! 加载配置、启动缓存存储与预热调度，并提供管理接口

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use loan_cache::{
    AppContext, Result,
    error::Context,
    app::AppTasks,
    config::{self, ConfigManager},
    lerror, linfo, lwarn,
    logging::{self, LogComponent, LogStage},
    management::ManagementServer,
};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "loan-cache", version, about = "贷款业务读缓存服务")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 日志级别（被 RUST_LOG 覆盖）
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// 打印日志配置指南后退出
    #[arg(long)]
    logging_help: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.logging_help {
        logging::print_logging_help();
        return Ok(());
    }

    let config_path = config::resolve_config_path(cli.config);
    let manager = ConfigManager::from_file(&config_path)?;
    let app_config = manager.into_config();

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| app_config.server.log_level.clone());
    logging::init_optimized_logging(Some(&log_level));

    linfo!(
        "system",
        LogStage::Startup,
        LogComponent::Main,
        "service_starting",
        &format!("服务启动，配置文件: {}", config_path.display())
    );

    let context = Arc::new(AppContext::new(app_config));
    let tasks = AppTasks::initialize(&context).await?;
    tasks.start().await.context("启动后台任务失败")?;

    let server = ManagementServer::new(Arc::clone(&context), Router::new())?;
    let served = server.serve(shutdown_signal()).await;

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_stopping",
        "收到关闭信号，停止后台任务"
    );
    if let Err(e) = tasks.shutdown().await {
        lwarn!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "tasks_shutdown_failed",
            &format!("后台任务关闭失败: {e}")
        );
    }

    if let Err(e) = served {
        lerror!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "service_failed",
            &format!("服务异常退出: {e}")
        );
        return Err(e);
    }

    linfo!(
        "system",
        LogStage::Shutdown,
        LogComponent::Main,
        "service_shutdown",
        "服务正常关闭"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        lerror!(
            "system",
            LogStage::Shutdown,
            LogComponent::Main,
            "signal_error",
            &format!("监听关闭信号失败: {e}")
        );
    }
}
