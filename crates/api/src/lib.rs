//! # Orchestrator API
//!
//! 任务编排系统的HTTP接口，基于Axum构建。
//!
//! ## API 端点
//!
//! ### 任务
//! - `POST /api/tasks` - 提交任务，返回任务ID
//! - `GET /api/tasks` - 所有任务及聚合统计
//! - `GET /api/tasks/{id}` - 单个任务
//! - `POST /api/tasks/{id}/cancel` - 取消任务
//!
//! ### Worker
//! - `GET /api/workers` - 所有Worker及汇总
//! - `GET /api/workers/{id}` - 单个Worker
//!
//! ### 统计
//! - `GET /api/statistics` - 探测、分发计数和任务聚合统计
//! - `GET /api/intake` - 文件任务接入统计
//! - `GET /health` - 健康检查
//!
//! ## 响应格式
//!
//! ```json
//! {
//!   "success": true,
//!   "data": { "task_id": "5f0c..." },
//!   "message": "任务已提交",
//!   "timestamp": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! 运行期故障（探测失败、分发失败、超时等）只体现在任务和Worker状态中，
//! 接口只对输入错误返回4xx。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use orchestrator_dispatcher::Orchestrator;
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(orchestrator: Arc<Orchestrator>) -> Router {
    create_routes(AppState { orchestrator }).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(cors_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
