use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use orchestrator_dispatcher::Orchestrator;

use crate::handlers::{
    health::health_check,
    system::{get_intake_stats, get_statistics},
    tasks::{cancel_task, get_task, list_tasks, submit_task},
    workers::{get_worker, list_workers},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务
        .route("/api/tasks", get(list_tasks).post(submit_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        // Worker
        .route("/api/workers", get(list_workers))
        .route("/api/workers/{id}", get(get_worker))
        // 统计
        .route("/api/statistics", get(get_statistics))
        .route("/api/intake", get(get_intake_stats))
        .with_state(state)
}
