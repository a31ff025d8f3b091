use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{OrchestratorError, OrchestratorResult};

/// 透传给Worker的任务参数，编排器不解释其内容
pub type TaskParameters = serde_json::Map<String, Value>;

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// 默认优先级
pub const DEFAULT_PRIORITY: i32 = 1;

/// 任务生命周期状态
///
/// `pending → assigned → running → {completed | failed}`，
/// `failed → pending` 为重试路径，`pending|assigned|running → cancelled` 为取消路径。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// 检查状态转换是否合法
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, Running)
                | (Assigned, Failed)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }

    /// 任务是否占用Worker
    pub fn holds_worker(&self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "assigned" => Ok(TaskState::Assigned),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            "cancelled" => Ok(TaskState::Cancelled),
            other => Err(OrchestratorError::InvalidTaskParams(format!(
                "未知的任务状态: {other}"
            ))),
        }
    }
}

/// 状态转换时附带更新的字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub assigned_worker: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time: Option<f64>,
}

impl TaskUpdate {
    pub fn assigned_to(worker_id: impl Into<String>) -> Self {
        Self {
            assigned_worker: Some(worker_id.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn completed(result: Value, execution_time: Option<f64>) -> Self {
        Self {
            result: Some(result),
            execution_time,
            ..Default::default()
        }
    }
}

/// 任务定义
///
/// 由任务存储独占持有。`assigned_worker` 只在 assigned/running 状态下存在，
/// 时间戳满足 `created_at ≤ assigned_at ≤ started_at ≤ completed_at`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub algorithm: String,
    pub parameters: TaskParameters,
    pub priority: i32,
    pub status: TaskState,
    pub assigned_worker: Option<String>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Task {
    /// 创建新任务，使用随机UUID作为标识
    pub fn new(algorithm: impl Into<String>, parameters: TaskParameters, priority: i32) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            algorithm,
            parameters,
            priority,
        )
    }

    pub fn with_id(
        id: impl Into<String>,
        algorithm: impl Into<String>,
        parameters: TaskParameters,
        priority: i32,
    ) -> Self {
        Self {
            id: id.into(),
            algorithm: algorithm.into(),
            parameters,
            priority,
            status: TaskState::Pending,
            assigned_worker: None,
            created_at: Utc::now(),
            assigned_at: None,
            started_at: None,
            completed_at: None,
            execution_time: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_terminal(&self) -> bool {
        match self.status {
            TaskState::Completed | TaskState::Cancelled => true,
            TaskState::Failed => !self.can_retry(),
            _ => false,
        }
    }

    /// 失败的任务是否还能重试
    pub fn can_retry(&self) -> bool {
        self.status == TaskState::Failed && self.retry_count < self.max_retries
    }

    /// 执行一次状态转换并更新时间戳
    pub fn apply_transition(
        &mut self,
        next: TaskState,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(self.invalid_transition(next));
        }
        if next == TaskState::Pending {
            // 重试路径必须经过 requeue 以维护重试计数
            return Err(self.invalid_transition(next));
        }

        match next {
            TaskState::Assigned => {
                let worker_id = update.assigned_worker.ok_or_else(|| {
                    OrchestratorError::InvalidTaskParams(format!(
                        "任务 {} 分配时缺少Worker标识",
                        self.id
                    ))
                })?;
                self.assigned_worker = Some(worker_id);
                self.assigned_at = Some(now.max(self.created_at));
            }
            TaskState::Running => {
                let floor = self.assigned_at.unwrap_or(self.created_at);
                self.started_at = Some(now.max(floor));
            }
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
                let floor = self
                    .started_at
                    .or(self.assigned_at)
                    .unwrap_or(self.created_at);
                let completed_at = now.max(floor);
                self.completed_at = Some(completed_at);
                self.execution_time = self.started_at.map(|started_at| {
                    update.execution_time.unwrap_or_else(|| {
                        (completed_at - started_at).num_milliseconds() as f64 / 1000.0
                    })
                });
                self.assigned_worker = None;

                if next == TaskState::Completed {
                    self.result = update.result;
                    self.error = None;
                } else {
                    if update.result.is_some() {
                        self.result = update.result;
                    }
                    self.error = update.error.or_else(|| Some(format!("任务{}", next)));
                }
            }
            TaskState::Pending => unreachable!("pending is handled by requeue"),
        }

        self.status = next;
        Ok(())
    }

    /// 将失败任务重新置为pending，重试计数加一
    pub fn requeue(&mut self) -> OrchestratorResult<()> {
        if !self.can_retry() {
            return Err(self.invalid_transition(TaskState::Pending));
        }
        self.retry_count += 1;
        self.status = TaskState::Pending;
        self.assigned_worker = None;
        self.assigned_at = None;
        self.started_at = None;
        self.completed_at = None;
        self.execution_time = None;
        self.result = None;
        Ok(())
    }

    fn invalid_transition(&self, next: TaskState) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            id: self.id.clone(),
            from: self.status.to_string(),
            to: next.to_string(),
        }
    }
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub algorithm: String,
    #[serde(default)]
    pub parameters: TaskParameters,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl NewTask {
    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.algorithm.trim().is_empty() {
            return Err(OrchestratorError::InvalidTaskParams(
                "algorithm不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

/// 任务接入文件中的任务描述
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: Option<String>,
    pub algorithm: Option<String>,
    #[serde(default)]
    pub parameters: Option<TaskParameters>,
    pub priority: Option<i32>,
    pub created_at: Option<String>,
}

impl TaskDescriptor {
    /// 将描述转换为任务，缺少task_id或algorithm时报错
    pub fn into_task(self, max_retries: u32) -> OrchestratorResult<Task> {
        let task_id = self
            .task_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| OrchestratorError::InvalidTaskParams("缺少task_id".to_string()))?;
        let algorithm = self
            .algorithm
            .filter(|algorithm| !algorithm.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::InvalidTaskParams(format!("任务 {task_id} 缺少algorithm"))
            })?;

        let mut task = Task::with_id(
            task_id,
            algorithm,
            self.parameters.unwrap_or_default(),
            self.priority.unwrap_or(DEFAULT_PRIORITY),
        )
        .with_max_retries(max_retries);

        // 无法解析的created_at直接忽略
        if let Some(created_at) = self.created_at.as_deref().and_then(parse_timestamp) {
            task.created_at = created_at;
        }

        Ok(task)
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// 任务聚合统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub pending: usize,
    pub assigned: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub queue_size: usize,
    pub avg_execution_time: f64,
    pub min_execution_time: f64,
    pub max_execution_time: f64,
}

impl TaskStats {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>, queue_size: usize) -> Self {
        let mut stats = TaskStats {
            queue_size,
            ..Default::default()
        };
        let mut execution_times = Vec::new();

        for task in tasks {
            stats.total_tasks += 1;
            match task.status {
                TaskState::Pending => stats.pending += 1,
                TaskState::Assigned => stats.assigned += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Completed => {
                    stats.completed += 1;
                    if let Some(execution_time) = task.execution_time {
                        execution_times.push(execution_time);
                    }
                }
                TaskState::Failed => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }

        if !execution_times.is_empty() {
            stats.avg_execution_time =
                execution_times.iter().sum::<f64>() / execution_times.len() as f64;
            stats.min_execution_time = execution_times.iter().copied().fold(f64::MAX, f64::min);
            stats.max_execution_time = execution_times.iter().copied().fold(f64::MIN, f64::max);
        }

        stats
    }
}
