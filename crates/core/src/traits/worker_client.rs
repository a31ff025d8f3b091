//! Worker通信接口
//!
//! 编排器与远程Worker之间只有两种调用：
//! - 存活探测 `ping`
//! - 任务分发 `dispatch`
//!
//! `dispatch` 返回的 `Ok` 表示请求已经准备好发出，任务随即进入running；
//! 发送请求和等待执行结果都在返回的 [`ExecutionFuture`] 中完成，
//! 调用方在自己的并发单元中等待，不会阻塞分发循环。
//! 请求没有送达Worker时（任一阶段）返回 [`OrchestratorError::Dispatch`](crate::OrchestratorError::Dispatch)。

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{
    models::{DispatchRequest, ExecutionReport, PingReply, WorkerEndpoint},
    OrchestratorResult,
};

/// 等待Worker执行结果的future
pub type ExecutionFuture = BoxFuture<'static, OrchestratorResult<ExecutionReport>>;

#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// 探测Worker存活状态，超时、连接失败或非2xx均返回错误
    async fn ping(&self, endpoint: &WorkerEndpoint) -> OrchestratorResult<PingReply>;

    /// 向Worker分发任务，返回等待执行结果的future
    async fn dispatch(
        &self,
        endpoint: &WorkerEndpoint,
        request: &DispatchRequest,
    ) -> OrchestratorResult<ExecutionFuture>;
}
