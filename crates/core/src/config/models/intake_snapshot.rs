use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 文件任务接入配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IntakeConfig {
    pub enabled: bool,
    pub queue_dir: PathBuf,
    pub poll_interval_seconds: u64,
    pub processed_subdir: String,
    /// 已处理文件名缓存容量
    pub processed_cache_size: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_dir: PathBuf::from("task_queues"),
            poll_interval_seconds: 10,
            processed_subdir: "processed".to_string(),
            processed_cache_size: 1024,
        }
    }
}

impl IntakeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.queue_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("任务队列目录不能为空"));
        }
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务接入轮询间隔必须大于0"));
        }
        if self.processed_subdir.trim().is_empty() || self.processed_subdir.contains(['/', '\\']) {
            return Err(anyhow::anyhow!(
                "已处理子目录名称无效: {}",
                self.processed_subdir
            ));
        }
        if self.processed_cache_size == 0 {
            return Err(anyhow::anyhow!("已处理文件缓存容量必须大于0"));
        }
        Ok(())
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.queue_dir.join(&self.processed_subdir)
    }
}

/// 状态快照与结果导出配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub state_file: PathBuf,
    pub results_dir: PathBuf,
    pub results_interval_seconds: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_file: PathBuf::from("logs/worker_state.json"),
            results_dir: PathBuf::from("results"),
            results_interval_seconds: 300,
        }
    }
}

impl SnapshotConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.state_file.file_name().is_none() {
            return Err(anyhow::anyhow!(
                "状态快照文件路径无效: {}",
                self.state_file.display()
            ));
        }
        if self.results_interval_seconds == 0 {
            return Err(anyhow::anyhow!("结果导出间隔必须大于0"));
        }
        Ok(())
    }
}
