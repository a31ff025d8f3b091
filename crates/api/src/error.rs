use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator_core::OrchestratorError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("编排器错误: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源: {0}")]
    NotFound(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Orchestrator(OrchestratorError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "TASK_NOT_FOUND",
                format!("任务 {id} 不存在"),
            ),
            ApiError::Orchestrator(OrchestratorError::WorkerNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "WORKER_NOT_FOUND",
                format!("Worker {id} 不存在"),
            ),
            ApiError::Orchestrator(OrchestratorError::InvalidTaskParams(msg)) => (
                StatusCode::BAD_REQUEST,
                "INVALID_TASK_PARAMS",
                format!("任务参数无效: {msg}"),
            ),
            ApiError::Orchestrator(OrchestratorError::DuplicateTask { id }) => (
                StatusCode::CONFLICT,
                "DUPLICATE_TASK",
                format!("任务 {id} 已存在"),
            ),
            ApiError::Orchestrator(err @ OrchestratorError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION", err.to_string())
            }
            ApiError::Orchestrator(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "系统内部错误".to_string(),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                format!("请求参数错误: {msg}"),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = self.parts();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
