use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Serialize;

use orchestrator_core::models::NewTask;

use crate::{
    error::ApiResult,
    response::{created, success},
    routes::AppState,
};

/// 任务提交响应
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
}

/// 提交任务，请求体无法解析时返回400
pub async fn submit_task(
    State(state): State<AppState>,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let Json(request) = payload?;
    let task_id = state.orchestrator.submit(request).await?;
    Ok(created(SubmitTaskResponse { task_id }, "任务已提交"))
}

/// 所有任务及聚合统计
pub async fn list_tasks(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let view = state.orchestrator.task_status(None).await?;
    Ok(success(view))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let view = state.orchestrator.task_status(Some(&id)).await?;
    Ok(success(view))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let task = state.orchestrator.cancel(&id).await?;
    Ok(success(task))
}
