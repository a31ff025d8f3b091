//! 测试辅助工具
//!
//! [`MockWorkerClient`] 以脚本方式模拟远程Worker，不需要网络即可驱动健康监控和任务分发。

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use orchestrator_core::{
    config::WorkerEndpointConfig,
    models::{DispatchRequest, ExecutionReport, PingReply, WorkerEndpoint},
    traits::{ExecutionFuture, WorkerClient},
    AppConfig, OrchestratorError, OrchestratorResult,
};

/// 分发行为
#[derive(Debug, Clone)]
pub enum DispatchMode {
    /// 立即返回给定的响应体
    Complete(Value),
    /// 不返回结果，直到调用 [`MockWorkerClient::resolve`]
    Hold,
    /// 分发阶段失败
    Reject(String),
}

pub struct MockWorkerClient {
    unreachable: Mutex<HashSet<String>>,
    mode: Mutex<DispatchMode>,
    held: Mutex<HashMap<String, oneshot::Sender<OrchestratorResult<ExecutionReport>>>>,
    dispatched: Mutex<Vec<(WorkerEndpoint, DispatchRequest)>>,
}

impl Default for MockWorkerClient {
    fn default() -> Self {
        Self::new(DispatchMode::Complete(serde_json::json!({
            "status": "success",
            "execution_time": 1.5,
        })))
    }
}

impl MockWorkerClient {
    pub fn new(mode: DispatchMode) -> Self {
        Self {
            unreachable: Mutex::new(HashSet::new()),
            mode: Mutex::new(mode),
            held: Mutex::new(HashMap::new()),
            dispatched: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reachable(&self, endpoint: &WorkerEndpoint, reachable: bool) {
        let mut unreachable = self.unreachable.lock().unwrap();
        if reachable {
            unreachable.remove(&endpoint.to_string());
        } else {
            unreachable.insert(endpoint.to_string());
        }
    }

    pub fn set_mode(&self, mode: DispatchMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// 返回一个被挂起任务的执行结果，任务不在挂起列表中时返回false
    pub fn resolve(&self, task_id: &str, payload: Value) -> bool {
        match self.held.lock().unwrap().remove(task_id) {
            Some(sender) => sender
                .send(Ok(ExecutionReport::from_payload(payload)))
                .is_ok(),
            None => false,
        }
    }

    pub fn held_tasks(&self) -> Vec<String> {
        self.held.lock().unwrap().keys().cloned().collect()
    }

    pub fn dispatched(&self) -> Vec<(WorkerEndpoint, DispatchRequest)> {
        self.dispatched.lock().unwrap().clone()
    }

    fn is_reachable(&self, endpoint: &WorkerEndpoint) -> bool {
        !self.unreachable.lock().unwrap().contains(&endpoint.to_string())
    }
}

#[async_trait]
impl WorkerClient for MockWorkerClient {
    async fn ping(&self, endpoint: &WorkerEndpoint) -> OrchestratorResult<PingReply> {
        if !self.is_reachable(endpoint) {
            return Err(OrchestratorError::Network(format!("{endpoint} 连接被拒绝")));
        }
        Ok(PingReply {
            status: Some("active".to_string()),
            worker_id: None,
            current_task: None,
        })
    }

    async fn dispatch(
        &self,
        endpoint: &WorkerEndpoint,
        request: &DispatchRequest,
    ) -> OrchestratorResult<ExecutionFuture> {
        if !self.is_reachable(endpoint) {
            return Err(OrchestratorError::Dispatch(format!("{endpoint} 连接被拒绝")));
        }
        self.dispatched
            .lock()
            .unwrap()
            .push((endpoint.clone(), request.clone()));

        let mode = self.mode.lock().unwrap().clone();
        let execution: ExecutionFuture = match mode {
            DispatchMode::Complete(payload) => {
                Box::pin(async move { Ok(ExecutionReport::from_payload(payload)) })
            }
            DispatchMode::Hold => {
                let (tx, rx) = oneshot::channel();
                self.held
                    .lock()
                    .unwrap()
                    .insert(request.task_id.clone(), tx);
                Box::pin(async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(OrchestratorError::Network("Worker连接已关闭".to_string()))
                    })
                })
            }
            DispatchMode::Reject(reason) => return Err(OrchestratorError::Dispatch(reason)),
        };
        Ok(execution)
    }
}

/// 构建使用本地端口的测试配置，Worker编号从1开始
pub fn test_config(worker_count: u16) -> AppConfig {
    let workers = (1..=worker_count)
        .map(|i| WorkerEndpointConfig::new(format!("worker-{i}"), "127.0.0.1", 5000 + i))
        .collect();
    let mut config = AppConfig::with_workers(workers);
    config.intake.enabled = false;
    config.snapshot.enabled = false;
    config.api.enabled = false;
    config
}
