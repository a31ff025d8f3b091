use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::{Task, TaskParameters};

/// Worker返回的成功状态取值
const SUCCESS_STATUSES: [&str; 3] = ["success", "completed", "ok"];

/// Worker `GET /ping` 的响应体，所有字段都是可选的
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PingReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub worker_id: Option<String>,
    #[serde(default)]
    pub current_task: Option<Value>,
}

/// 发往Worker `POST /execute` 的请求体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRequest {
    pub task_id: String,
    pub algorithm: String,
    pub parameters: TaskParameters,
}

impl From<&Task> for DispatchRequest {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            algorithm: task.algorithm.clone(),
            parameters: task.parameters.clone(),
        }
    }
}

/// Worker执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionReport {
    pub success: bool,
    /// Worker自报的执行耗时（秒）
    pub execution_time: Option<f64>,
    pub error: Option<String>,
    /// 原始响应体，作为任务结果保存
    pub payload: Value,
}

impl ExecutionReport {
    /// 解析Worker响应体
    ///
    /// `success == true` 或 `status` 为 success/completed/ok 时视为成功。
    pub fn from_payload(payload: Value) -> Self {
        let success = payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
            || payload
                .get("status")
                .and_then(Value::as_str)
                .map(|status| SUCCESS_STATUSES.contains(&status.to_ascii_lowercase().as_str()))
                .unwrap_or(false);

        let execution_time = payload
            .get("execution_time")
            .and_then(Value::as_f64)
            .or_else(|| payload.get("duration_seconds").and_then(Value::as_f64));

        let error = payload.get("error").and_then(|error| match error {
            Value::Null => None,
            Value::String(message) => Some(message.clone()),
            other => Some(other.to_string()),
        });

        Self {
            success,
            execution_time,
            error,
            payload,
        }
    }

    /// 失败时写入任务的错误信息
    pub fn failure_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "Worker报告执行失败".to_string())
    }
}
