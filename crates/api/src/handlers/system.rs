use axum::extract::State;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

/// 运行统计
pub async fn get_statistics(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    Ok(success(state.orchestrator.statistics().await))
}

/// 文件任务接入统计
pub async fn get_intake_stats(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let stats = state
        .orchestrator
        .intake_stats()
        .await
        .ok_or_else(|| ApiError::NotFound("文件任务接入未启用".to_string()))?;
    Ok(success(stats))
}
