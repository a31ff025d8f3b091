use std::path::{Path, PathBuf};

use async_trait::async_trait;
use orchestrator_core::{
    models::{ResultsSnapshot, StateSnapshot},
    traits::SnapshotSink,
    OrchestratorResult,
};
use serde::Serialize;
use tracing::debug;

/// 以JSON文件形式输出快照
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotSink {
    state_file: PathBuf,
    results_dir: PathBuf,
}

impl JsonFileSnapshotSink {
    pub fn new(state_file: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            results_dir: results_dir.into(),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }
}

/// 先写临时文件再重命名，读者不会看到写了一半的文件
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> OrchestratorResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let body = serde_json::to_vec_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl SnapshotSink for JsonFileSnapshotSink {
    async fn write_state(&self, snapshot: &StateSnapshot) -> OrchestratorResult<()> {
        write_json_atomic(&self.state_file, snapshot).await?;
        debug!(path = %self.state_file.display(), "Worker状态快照已写入");
        Ok(())
    }

    /// 结果文件名精确到毫秒，同名文件已存在时追加序号，已有的导出不会被覆盖
    async fn write_results(&self, snapshot: &ResultsSnapshot) -> OrchestratorResult<PathBuf> {
        let stem = format!(
            "task_results_{}",
            snapshot.timestamp.format("%Y%m%d_%H%M%S_%3f")
        );
        let mut path = self.results_dir.join(format!("{stem}.json"));
        let mut sequence = 1;
        while tokio::fs::try_exists(&path).await? {
            path = self.results_dir.join(format!("{stem}_{sequence}.json"));
            sequence += 1;
        }

        write_json_atomic(&path, snapshot).await?;
        debug!(path = %path.display(), "任务结果已导出");
        Ok(path)
    }
}
