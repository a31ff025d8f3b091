use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::{json, Value};

use crate::routes::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let summary = state.orchestrator.registry().summary(Utc::now()).await;
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": "elastic-task-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": {
            "total": summary.total_workers,
            "healthy": summary.healthy_workers,
        }
    }))
}
