use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    config::IntakeConfig,
    models::{IntakeStats, TaskDescriptor},
    OrchestratorError, OrchestratorResult,
};
use orchestrator_infrastructure::TaskStore;

/// 任务文件的两种格式：`{"tasks": [...]}` 或直接的数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskFile {
    Wrapped { tasks: Vec<Value> },
    List(Vec<Value>),
}

impl TaskFile {
    fn into_descriptors(self) -> Vec<Value> {
        match self {
            TaskFile::Wrapped { tasks } => tasks,
            TaskFile::List(tasks) => tasks,
        }
    }
}

/// 容量有限的已处理文件名缓存，超出容量时淘汰最久未使用的条目
#[derive(Debug)]
pub struct ProcessedCache {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl ProcessedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub fn contains(&mut self, name: &str) -> bool {
        if !self.members.contains(name) {
            return false;
        }
        self.touch(name);
        true
    }

    pub fn insert(&mut self, name: &str) {
        if self.members.contains(name) {
            self.touch(name);
            return;
        }
        self.members.insert(name.to_string());
        self.order.push_back(name.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn touch(&mut self, name: &str) {
        if let Some(position) = self.order.iter().position(|entry| entry == name) {
            if let Some(entry) = self.order.remove(position) {
                self.order.push_back(entry);
            }
        }
    }
}

/// 单个文件的处理结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReport {
    pub file_name: String,
    pub ingested: Vec<String>,
    pub skipped: usize,
    pub moved_to: Option<PathBuf>,
}

/// 文件任务接入
///
/// 周期性扫描队列目录中的 `.json` 文件，将其中的任务描述按直接提交的同一路径写入任务存储，
/// 已存在的task_id会被跳过。文件中的所有描述都尝试过之后，文件被移动到已处理子目录。
pub struct TaskIntake {
    tasks: Arc<TaskStore>,
    config: IntakeConfig,
    default_max_retries: u32,
    processed: Mutex<ProcessedCache>,
    processed_files: AtomicU64,
    tasks_ingested: AtomicU64,
    tasks_skipped: AtomicU64,
}

impl TaskIntake {
    pub fn new(tasks: Arc<TaskStore>, config: IntakeConfig, default_max_retries: u32) -> Self {
        let processed = Mutex::new(ProcessedCache::new(config.processed_cache_size));
        Self {
            tasks,
            config,
            default_max_retries,
            processed,
            processed_files: AtomicU64::new(0),
            tasks_ingested: AtomicU64::new(0),
            tasks_skipped: AtomicU64::new(0),
        }
    }

    pub fn queue_dir(&self) -> &Path {
        &self.config.queue_dir
    }

    /// 队列目录中的待处理文件名，按名称排序
    async fn list_candidates(&self) -> OrchestratorResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.config.queue_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(".json") {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// 扫描一次队列目录
    pub async fn scan_once(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<FileReport>> {
        let mut reports = Vec::new();
        for name in self.list_candidates().await? {
            if self.processed.lock().await.contains(&name) {
                continue;
            }
            match self.process_file(&name, now).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(file = %name, "处理任务文件失败: {}", e),
            }
        }
        Ok(reports)
    }

    /// 处理单个任务文件；读取或解析失败时文件保留在原处，下次轮询重试
    pub async fn process_file(&self, name: &str, now: DateTime<Utc>) -> OrchestratorResult<FileReport> {
        let path = self.config.queue_dir.join(name);
        info!(file = %name, "处理任务文件");

        let raw = tokio::fs::read_to_string(&path).await?;
        let descriptors = serde_json::from_str::<TaskFile>(&raw)
            .map_err(|e| OrchestratorError::Serialization(format!("{name}: {e}")))?
            .into_descriptors();

        let mut report = FileReport {
            file_name: name.to_string(),
            ..Default::default()
        };
        if descriptors.is_empty() {
            warn!(file = %name, "任务文件不包含任务");
        }

        let total = descriptors.len();
        for value in descriptors {
            match self.ingest(value).await {
                Ok(task_id) => report.ingested.push(task_id),
                Err(reason) => {
                    report.skipped += 1;
                    debug!(file = %name, "跳过任务描述: {}", reason);
                }
            }
        }
        info!(
            file = %name,
            "已加载 {}/{} 个任务",
            report.ingested.len(),
            total
        );

        self.processed.lock().await.insert(name);
        self.processed_files.fetch_add(1, Ordering::Relaxed);
        self.tasks_ingested
            .fetch_add(report.ingested.len() as u64, Ordering::Relaxed);
        self.tasks_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);

        match self.move_processed(&path, name, now).await {
            Ok(target) => report.moved_to = Some(target),
            Err(e) => warn!(file = %name, "移动已处理文件失败: {}", e),
        }

        Ok(report)
    }

    async fn ingest(&self, value: Value) -> Result<String, OrchestratorError> {
        let descriptor: TaskDescriptor = serde_json::from_value(value)?;
        let task = descriptor.into_task(self.default_max_retries).map_err(|e| {
            warn!("无效的任务描述: {}", e);
            e
        })?;
        let task_id = task.id.clone();
        self.tasks.insert(task).await?;
        debug!(task_id = %task_id, "任务已从文件加入队列");
        Ok(task_id)
    }

    async fn move_processed(&self, path: &Path, name: &str, now: DateTime<Utc>) -> OrchestratorResult<PathBuf> {
        let processed_dir = self.config.processed_dir();
        tokio::fs::create_dir_all(&processed_dir).await?;
        let target = processed_dir.join(format!("{}_{}", now.format("%Y%m%d_%H%M%S"), name));
        tokio::fs::rename(path, &target).await?;
        debug!(file = %name, target = %target.display(), "文件已移动到已处理目录");
        Ok(target)
    }

    pub async fn stats(&self) -> IntakeStats {
        let candidates = self.list_candidates().await.unwrap_or_default();
        let mut processed = self.processed.lock().await;
        let pending_files = candidates
            .iter()
            .filter(|name| !processed.contains(name))
            .count();

        IntakeStats {
            processed_files: self.processed_files.load(Ordering::Relaxed),
            tasks_ingested: self.tasks_ingested.load(Ordering::Relaxed),
            tasks_skipped: self.tasks_skipped.load(Ordering::Relaxed),
            pending_files,
            queue_dir: self.config.queue_dir.display().to_string(),
        }
    }

    /// 任务接入循环，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if let Err(e) = tokio::fs::create_dir_all(&self.config.queue_dir).await {
            warn!(dir = %self.config.queue_dir.display(), "创建任务队列目录失败: {}", e);
        }
        info!(
            "启动文件任务接入，目录: {}，轮询间隔: {}秒",
            self.config.queue_dir.display(),
            self.config.poll_interval_seconds
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once(Utc::now()).await {
                        error!("扫描任务队列目录失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止文件任务接入");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::TaskState;
    use serde_json::json;
    use tempfile::TempDir;

    fn intake(dir: &TempDir) -> (TaskIntake, Arc<TaskStore>) {
        let tasks = Arc::new(TaskStore::new(3));
        let config = IntakeConfig {
            queue_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        (TaskIntake::new(tasks.clone(), config, 3), tasks)
    }

    fn write(dir: &TempDir, name: &str, value: Value) {
        std::fs::write(dir.path().join(name), serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_processed_cache_is_bounded_lru() {
        let mut cache = ProcessedCache::new(2);
        cache.insert("a.json");
        cache.insert("b.json");
        assert!(cache.contains("a.json"));
        cache.insert("c.json");
        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a.json"));
        assert!(!cache.contains("b.json"));
        assert!(cache.contains("c.json"));
    }

    #[tokio::test]
    async fn test_wrapped_file_is_ingested_and_moved() {
        let dir = TempDir::new().unwrap();
        let (intake, tasks) = intake(&dir);
        write(
            &dir,
            "batch_001.json",
            json!({"tasks": [
                {"task_id": "a", "algorithm": "benchmark.py", "parameters": {"NUM_PASOS": 100}, "priority": 3},
                {"task_id": "b", "algorithm": "benchmark_cython.py"},
                {"algorithm": "benchmark.py"}
            ]}),
        );

        let reports = intake.scan_once(Utc::now()).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].ingested, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(reports[0].skipped, 1);

        let moved = reports[0].moved_to.clone().unwrap();
        assert!(moved.starts_with(dir.path().join("processed")));
        assert!(moved.file_name().unwrap().to_str().unwrap().ends_with("_batch_001.json"));
        assert!(!dir.path().join("batch_001.json").exists());

        let b = tasks.get("b").await.unwrap();
        assert_eq!(b.priority, 1);
        assert_eq!(b.status, TaskState::Pending);
        assert!(b.parameters.is_empty());
    }

    #[tokio::test]
    async fn test_bare_array_file() {
        let dir = TempDir::new().unwrap();
        let (intake, tasks) = intake(&dir);
        write(&dir, "list.json", json!([{"task_id": "x", "algorithm": "benchmark.py"}]));

        intake.scan_once(Utc::now()).await.unwrap();
        assert!(tasks.contains("x").await);
    }

    #[tokio::test]
    async fn test_same_task_id_twice_yields_one_record() {
        let dir = TempDir::new().unwrap();
        let (intake, tasks) = intake(&dir);
        let descriptor = json!({"task_id": "dup", "algorithm": "benchmark.py", "priority": 2});
        write(&dir, "first.json", json!({"tasks": [descriptor.clone()]}));
        write(&dir, "second.json", json!({"tasks": [descriptor]}));

        let reports = intake.scan_once(Utc::now()).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].ingested.len() + reports[1].ingested.len(), 1);
        assert_eq!(tasks.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_file_stays_for_retry() {
        let dir = TempDir::new().unwrap();
        let (intake, _tasks) = intake(&dir);
        std::fs::write(dir.path().join("partial.json"), b"{\"tasks\": [").unwrap();

        let reports = intake.scan_once(Utc::now()).await.unwrap();
        assert!(reports.is_empty());
        assert!(dir.path().join("partial.json").exists());

        let stats = intake.stats().await;
        assert_eq!(stats.pending_files, 1);
        assert_eq!(stats.processed_files, 0);
    }

    #[tokio::test]
    async fn test_non_json_files_ignored_and_stats() {
        let dir = TempDir::new().unwrap();
        let (intake, _tasks) = intake(&dir);
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        write(&dir, "ok.json", json!({"tasks": [{"task_id": "t", "algorithm": "benchmark.py"}]}));

        intake.scan_once(Utc::now()).await.unwrap();
        let stats = intake.stats().await;
        assert_eq!(stats.processed_files, 1);
        assert_eq!(stats.tasks_ingested, 1);
        assert_eq!(stats.pending_files, 0);
        assert_eq!(stats.queue_dir, dir.path().display().to_string());
    }

    #[tokio::test]
    async fn test_missing_queue_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let tasks = Arc::new(TaskStore::new(3));
        let config = IntakeConfig {
            queue_dir: dir.path().join("absent"),
            ..Default::default()
        };
        let intake = TaskIntake::new(tasks, config, 3);
        assert!(intake.scan_once(Utc::now()).await.unwrap().is_empty());
    }
}
