use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    models::{ResultsSnapshot, StateSnapshot},
    OrchestratorResult,
};

/// 可观测性快照输出接口
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    /// 覆盖写入最新的Worker状态快照
    async fn write_state(&self, snapshot: &StateSnapshot) -> OrchestratorResult<()>;

    /// 写入一份任务结果导出，返回生成的文件路径
    async fn write_results(&self, snapshot: &ResultsSnapshot) -> OrchestratorResult<PathBuf>;
}
