use axum::extract::{Path, State};

use crate::{error::ApiResult, response::success, routes::AppState};

/// 所有Worker及汇总
pub async fn list_workers(
    State(state): State<AppState>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let view = state.orchestrator.worker_status(None).await?;
    Ok(success(view))
}

pub async fn get_worker(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let view = state.orchestrator.worker_status(Some(&id)).await?;
    Ok(success(view))
}
