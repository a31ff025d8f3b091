use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::{
    models::{DispatchRequest, ExecutionReport, PingReply, WorkerEndpoint},
    traits::{ExecutionFuture, WorkerClient},
    OrchestratorError, OrchestratorResult,
};
use serde_json::Value;
use tracing::debug;

/// 基于HTTP的Worker客户端
///
/// - `GET /ping`：整个请求受 `probe_timeout` 约束
/// - `POST /execute`：Worker在计算结束后才响应，因此整个请求都在返回的
///   [`ExecutionFuture`] 中完成。建立连接受 `dispatch_timeout` 约束，
///   整个请求以 `result_timeout + dispatch_timeout` 为上限，正常情况下由超时扫描先行判定超时
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http_client: reqwest::Client,
    probe_timeout: Duration,
    dispatch_timeout: Duration,
    result_timeout: Duration,
}

impl HttpWorkerClient {
    pub fn new(
        probe_timeout: Duration,
        dispatch_timeout: Duration,
        result_timeout: Duration,
    ) -> OrchestratorResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(dispatch_timeout)
            .build()
            .map_err(|e| OrchestratorError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            http_client,
            probe_timeout,
            dispatch_timeout,
            result_timeout,
        })
    }
}

fn map_reqwest_error(context: &str, err: reqwest::Error) -> OrchestratorError {
    if err.is_timeout() {
        OrchestratorError::Timeout(format!("{context}: {err}"))
    } else if err.is_decode() {
        OrchestratorError::Serialization(format!("{context}: {err}"))
    } else {
        OrchestratorError::Network(format!("{context}: {err}"))
    }
}

/// 连接阶段的错误说明请求没有送达Worker
fn map_execute_error(context: &str, err: reqwest::Error) -> OrchestratorError {
    if err.is_connect() {
        OrchestratorError::Dispatch(format!("{context}: {err}"))
    } else {
        map_reqwest_error(context, err)
    }
}

#[async_trait]
impl WorkerClient for HttpWorkerClient {
    async fn ping(&self, endpoint: &WorkerEndpoint) -> OrchestratorResult<PingReply> {
        let url = format!("{}/ping", endpoint.base_url());
        let response = self
            .http_client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Network(format!("{url}: HTTP {status}")));
        }

        // 响应体不影响存活判定
        let body = response.bytes().await.unwrap_or_default();
        Ok(serde_json::from_slice(&body).unwrap_or_default())
    }

    async fn dispatch(
        &self,
        endpoint: &WorkerEndpoint,
        request: &DispatchRequest,
    ) -> OrchestratorResult<ExecutionFuture> {
        let url = format!("{}/execute", endpoint.base_url());
        let send = self.http_client.post(&url).json(request).send();
        let deadline = self.result_timeout + self.dispatch_timeout;
        let task_id = request.task_id.clone();

        let execution: ExecutionFuture = Box::pin(async move {
            let response = tokio::time::timeout(deadline, send)
                .await
                .map_err(|_| OrchestratorError::Timeout(format!("{url}: 等待执行结果超时")))?
                .map_err(|e| map_execute_error(&url, e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(OrchestratorError::Dispatch(format!(
                    "{url}: HTTP {status} {}",
                    body.trim()
                )));
            }
            debug!(task_id = %task_id, %url, "收到Worker执行结果");

            let payload = response.json::<Value>().await.map_err(|e| {
                OrchestratorError::Serialization(format!("{url}: 无法解析执行结果: {e}"))
            })?;
            Ok(ExecutionReport::from_payload(payload))
        });
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> WorkerEndpoint {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        WorkerEndpoint::new("127.0.0.1", port)
    }

    fn client() -> HttpWorkerClient {
        HttpWorkerClient::new(
            Duration::from_millis(500),
            Duration::from_millis(500),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    fn request() -> DispatchRequest {
        DispatchRequest {
            task_id: "t1".to_string(),
            algorithm: "benchmark.py".to_string(),
            parameters: json!({"NUM_PASOS": 10}).as_object().cloned().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_ping_success() {
        let endpoint = serve(Router::new().route(
            "/ping",
            get(|| async { Json(json!({"status": "alive", "worker_id": "w1", "current_task": null})) }),
        ))
        .await;

        let reply = client().ping(&endpoint).await.unwrap();
        assert_eq!(reply.worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_ping_non_2xx_is_failure() {
        let endpoint = serve(Router::new().route(
            "/ping",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;

        assert!(client().ping(&endpoint).await.is_err());
    }

    #[tokio::test]
    async fn test_ping_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = client()
            .ping(&WorkerEndpoint::new("127.0.0.1", port))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Network(_)));
    }

    #[tokio::test]
    async fn test_dispatch_and_result() {
        let endpoint = serve(Router::new().route(
            "/execute",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "status": "success",
                    "task_id": body["task_id"],
                    "execution_time": 1.5,
                    "worker_id": "w1"
                }))
            }),
        ))
        .await;

        let pending = client().dispatch(&endpoint, &request()).await.unwrap();
        let report = pending.await.unwrap();
        assert!(report.success);
        assert_eq!(report.execution_time, Some(1.5));
        assert_eq!(report.payload["task_id"], "t1");
    }

    #[tokio::test]
    async fn test_dispatch_rejected() {
        let endpoint = serve(Router::new().route(
            "/execute",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "busy") }),
        ))
        .await;

        let pending = client().dispatch(&endpoint, &request()).await.unwrap();
        let err = pending.await.unwrap_err();
        assert!(err.is_dispatch_failure());
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_dispatch_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let pending = client()
            .dispatch(&WorkerEndpoint::new("127.0.0.1", port), &request())
            .await
            .unwrap();
        let err = pending.await.unwrap_err();
        assert!(err.is_dispatch_failure());
    }

    #[tokio::test]
    async fn test_dispatch_waits_for_slow_computation() {
        let endpoint = serve(Router::new().route(
            "/execute",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Json(json!({"status": "success", "execution_time": 0.3}))
            }),
        ))
        .await;

        // 请求在返回的future被轮询时才发出
        let pending = client().dispatch(&endpoint, &request()).await.unwrap();
        let started = std::time::Instant::now();
        let report = pending.await.unwrap();
        assert!(report.success);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_malformed_result() {
        let endpoint = serve(Router::new().route("/execute", post(|| async { "not json" }))).await;

        let pending = client().dispatch(&endpoint, &request()).await.unwrap();
        let err = pending.await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Serialization(_)));
    }
}
