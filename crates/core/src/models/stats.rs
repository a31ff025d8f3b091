use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{Task, TaskStats};
use super::worker::{WorkerSnapshot, WorkerSummary};

/// 运行时计数器的一次读取结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeCounters {
    pub total_pings: u64,
    pub successful_pings: u64,
    pub failed_pings: u64,
    pub workers_discovered: u64,
    pub workers_lost: u64,
    pub tasks_distributed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_timed_out: u64,
    pub tasks_retried: u64,
}

impl RuntimeCounters {
    pub fn ping_success_rate(&self) -> f64 {
        if self.total_pings == 0 {
            0.0
        } else {
            self.successful_pings as f64 / self.total_pings as f64
        }
    }

    pub fn task_completion_rate(&self) -> f64 {
        if self.tasks_distributed == 0 {
            0.0
        } else {
            self.tasks_completed as f64 / self.tasks_distributed as f64
        }
    }
}

/// `statistics()` 查询的返回值
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatistics {
    #[serde(flatten)]
    pub counters: RuntimeCounters,
    pub uptime_seconds: f64,
    pub ping_success_rate: f64,
    pub task_completion_rate: f64,
    pub task_statistics: TaskStats,
}

impl SystemStatistics {
    pub fn new(counters: RuntimeCounters, uptime_seconds: f64, task_statistics: TaskStats) -> Self {
        Self {
            ping_success_rate: counters.ping_success_rate(),
            task_completion_rate: counters.task_completion_rate(),
            counters,
            uptime_seconds,
            task_statistics,
        }
    }
}

/// 所有任务及聚合统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOverview {
    pub tasks: Vec<Task>,
    pub statistics: TaskStats,
}

/// `task_status()` 查询的返回值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskStatusView {
    Single(Box<Task>),
    All(TaskOverview),
}

/// 所有Worker及汇总信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOverview {
    pub workers: BTreeMap<String, WorkerSnapshot>,
    pub summary: WorkerSummary,
}

/// `worker_status()` 查询的返回值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerStatusView {
    Single(Box<WorkerSnapshot>),
    All(WorkerOverview),
}

/// 任务接入统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntakeStats {
    pub processed_files: u64,
    pub tasks_ingested: u64,
    pub tasks_skipped: u64,
    pub pending_files: usize,
    pub queue_dir: String,
}

/// 健康检查后持久化的状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub timestamp: DateTime<Utc>,
    pub workers: BTreeMap<String, WorkerSnapshot>,
    pub stats: RuntimeCounters,
    pub task_stats: TaskStats,
}

/// 定期导出的任务结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub tasks: Vec<Task>,
    pub statistics: SystemStatistics,
}
