//! 缓存管理处理器：统计、按需预热、清理

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::WarmupOutcome;
use crate::cache::keys::validate_pattern;
use crate::error::{AppError, Result};
use crate::management::{response, server::AppState};
use crate::{linfo, lwarn, logging::{LogComponent, LogStage}};

/// 预热请求；`keys` 为空时执行全量预热
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WarmupRequest {
    pub keys: Option<Vec<String>>,
}

/// 清理请求，三种方式至少指定一种
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ClearRequest {
    pub keys: Option<Vec<String>>,
    pub pattern: Option<String>,
    pub all: bool,
}

/// 清理结果
#[derive(Debug, Serialize)]
pub struct ClearResult {
    pub cleared: u64,
    pub connected: bool,
}

/// 空请求体视为默认值
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        AppError::validation(format!("请求体解析失败: {e}"), Some("body".to_string()))
    })
}

/// `GET /api/cache/stats`
pub async fn get_cache_stats(State(state): State<AppState>) -> Response {
    response::success(state.store().get_stats().await)
}

/// `GET /api/cache/warmup`
pub async fn get_warmup_status(State(state): State<AppState>) -> Response {
    response::success(state.warmer().get_status().await)
}

/// `POST /api/cache/warmup`
pub async fn trigger_warmup(State(state): State<AppState>, body: Bytes) -> Response {
    let request: WarmupRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(err) => return response::app_error(err),
    };

    let warmer = state.warmer();
    let outcome = match request.keys.filter(|keys| !keys.is_empty()) {
        Some(keys) => warmer.warm_specific_keys(&keys).await,
        None => warmer.perform_warmup().await,
    };

    let message = match &outcome {
        WarmupOutcome::AlreadyRunning => "预热正在进行中，本次请求已跳过".to_string(),
        WarmupOutcome::Completed(report) => {
            format!("预热完成: {}/{} 个任务成功", report.succeeded, report.total)
        }
    };
    response::success_with_message(outcome, &message)
}

/// `POST /api/cache/clear`
pub async fn clear_cache(State(state): State<AppState>, body: Bytes) -> Response {
    match clear(&state, &body).await {
        Ok(result) => {
            let message = format!("{} keys cleared", result.cleared);
            response::success_with_message(result, &message)
        }
        Err(err) => response::app_error(err),
    }
}

async fn clear(state: &AppState, body: &Bytes) -> Result<ClearResult> {
    let request: ClearRequest = parse_body(body)?;
    let store = state.store();

    if request.keys.is_none() && request.pattern.is_none() && !request.all {
        return Err(AppError::validation(
            "必须指定 keys、pattern 或 all 之一",
            None,
        ));
    }
    if let Some(pattern) = &request.pattern {
        validate_pattern(pattern)?;
    }

    let mut cleared = 0;

    if request.all {
        let Some(removed) = store.clear_namespace().await else {
            lwarn!(
                "system",
                LogStage::Cache,
                LogComponent::Management,
                "flush_failed",
                "清空缓存失败，缓存不可用"
            );
            return Err(AppError::cache("缓存不可用，清空失败"));
        };
        cleared += removed;
    } else {
        if let Some(keys) = &request.keys {
            for key in keys {
                if store.del(key).await {
                    cleared += 1;
                }
            }
        }
        if let Some(pattern) = &request.pattern {
            cleared += store.del_pattern(pattern).await;
        }
    }

    linfo!(
        "system",
        LogStage::Cache,
        LogComponent::Management,
        "cache_cleared",
        &format!("管理接口清理缓存: cleared={cleared}, all={}", request.all)
    );

    Ok(ClearResult {
        cleared,
        connected: store.is_connected(),
    })
}
