use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 最近一次成功探测之后，Worker仍被视为健康的最长时间（秒）
pub const DEFAULT_STALENESS_SECONDS: i64 = 30;
/// 连续探测失败达到该值后Worker不再健康
pub const DEFAULT_UNHEALTHY_FAILURE_THRESHOLD: u32 = 3;
/// 连续探测失败达到该值后Worker被判定为丢失
pub const DEFAULT_LOST_FAILURE_CEILING: u32 = 5;
/// 延迟滑动窗口大小
pub const DEFAULT_LATENCY_WINDOW: usize = 10;
/// 任务执行历史保留条数
pub const DEFAULT_TASK_HISTORY_LIMIT: usize = 50;
/// 快照中输出的历史条数
const SNAPSHOT_HISTORY_ENTRIES: usize = 10;

/// Worker健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerHealth {
    #[default]
    Unknown,
    Active,
    Unstable,
    Inactive,
}

impl WorkerHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerHealth::Unknown => "unknown",
            WorkerHealth::Active => "active",
            WorkerHealth::Unstable => "unstable",
            WorkerHealth::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for WorkerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker网络地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    pub host: String,
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// 健康判定策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    pub staleness_seconds: i64,
    pub unhealthy_failure_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            staleness_seconds: DEFAULT_STALENESS_SECONDS,
            unhealthy_failure_threshold: DEFAULT_UNHEALTHY_FAILURE_THRESHOLD,
        }
    }
}

/// 单次任务执行结果记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskOutcomeRecord {
    pub task_id: String,
    pub success: bool,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

/// 探测失败后的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailureEffect {
    /// 失败次数未达上限，Worker标记为不稳定
    Degraded,
    /// 失败次数达到上限且Worker此前在线，判定为丢失
    Lost,
    /// 失败次数达到上限，但Worker此前并未在线
    Inactive,
}

/// Worker节点信息
///
/// 由Worker注册表独占持有，只会被健康监控（探测结果）和
/// 分发器/故障恢复（任务分配、完成、丢失）修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: String,
    pub endpoint: WorkerEndpoint,
    pub health: WorkerHealth,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub latencies: VecDeque<f64>,
    pub tasks_completed: u64,
    pub current_task: Option<String>,
    pub processing_power: f64,
    pub history: VecDeque<TaskOutcomeRecord>,
    #[serde(skip, default = "default_latency_window")]
    latency_window: usize,
    #[serde(skip, default = "default_history_limit")]
    history_limit: usize,
}

fn default_latency_window() -> usize {
    DEFAULT_LATENCY_WINDOW
}

fn default_history_limit() -> usize {
    DEFAULT_TASK_HISTORY_LIMIT
}

impl Worker {
    /// 创建新的Worker，初始状态为unknown
    pub fn new(id: impl Into<String>, endpoint: WorkerEndpoint, processing_power: f64) -> Self {
        Self {
            id: id.into(),
            endpoint,
            health: WorkerHealth::Unknown,
            last_probe: None,
            last_success: None,
            consecutive_failures: 0,
            latencies: VecDeque::with_capacity(DEFAULT_LATENCY_WINDOW),
            tasks_completed: 0,
            current_task: None,
            processing_power,
            history: VecDeque::new(),
            latency_window: DEFAULT_LATENCY_WINDOW,
            history_limit: DEFAULT_TASK_HISTORY_LIMIT,
        }
    }

    /// 调整延迟窗口和历史记录上限
    pub fn with_windows(mut self, latency_window: usize, history_limit: usize) -> Self {
        self.latency_window = latency_window.max(1);
        self.history_limit = history_limit.max(1);
        self
    }

    /// 记录一次成功探测，返回Worker是否从非active状态恢复
    pub fn record_probe_success(&mut self, latency_seconds: f64, now: DateTime<Utc>) -> bool {
        let recovered = self.health != WorkerHealth::Active;
        self.health = WorkerHealth::Active;
        self.consecutive_failures = 0;
        self.last_probe = Some(now);
        self.last_success = Some(now);

        self.latencies.push_back(latency_seconds);
        while self.latencies.len() > self.latency_window {
            self.latencies.pop_front();
        }

        recovered
    }

    /// 记录一次失败探测
    ///
    /// 失败次数达到 `lost_ceiling` 时Worker变为inactive；若此前处于
    /// active或unstable，则视为丢失，调用方需要在同一临界区内处理其当前任务。
    pub fn record_probe_failure(&mut self, now: DateTime<Utc>, lost_ceiling: u32) -> ProbeFailureEffect {
        self.last_probe = Some(now);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures >= lost_ceiling {
            let was_online = matches!(self.health, WorkerHealth::Active | WorkerHealth::Unstable);
            self.health = WorkerHealth::Inactive;
            if was_online {
                ProbeFailureEffect::Lost
            } else {
                ProbeFailureEffect::Inactive
            }
        } else {
            // 已经inactive的Worker在计数被重置前保持inactive
            if self.health != WorkerHealth::Inactive {
                self.health = WorkerHealth::Unstable;
            }
            ProbeFailureEffect::Degraded
        }
    }

    /// 滚动平均探测延迟（秒）
    pub fn average_latency(&self) -> f64 {
        if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<f64>() / self.latencies.len() as f64
        }
    }

    /// 记录任务执行结果
    pub fn record_task_outcome(
        &mut self,
        task_id: impl Into<String>,
        success: bool,
        execution_time: f64,
        now: DateTime<Utc>,
    ) {
        self.history.push_back(TaskOutcomeRecord {
            task_id: task_id.into(),
            success,
            execution_time,
            timestamp: now,
        });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        if success {
            self.tasks_completed += 1;
        }
    }

    /// 成功任务的平均执行时间（秒）
    pub fn average_task_time(&self) -> f64 {
        let (sum, count) = self
            .history
            .iter()
            .filter(|record| record.success)
            .fold((0.0, 0usize), |(sum, count), record| {
                (sum + record.execution_time, count + 1)
            });
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// 任务成功率，没有历史时为1.0
    pub fn success_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 1.0;
        }
        let successful = self.history.iter().filter(|record| record.success).count();
        successful as f64 / self.history.len() as f64
    }

    pub fn is_busy(&self) -> bool {
        self.current_task.is_some()
    }

    /// 检查Worker是否健康
    pub fn is_healthy(&self, now: DateTime<Utc>, policy: &HealthPolicy) -> bool {
        if self.health != WorkerHealth::Active {
            return false;
        }
        let fresh = self
            .last_success
            .map(|at| (now - at).num_milliseconds() <= policy.staleness_seconds * 1000)
            .unwrap_or(false);
        fresh && self.consecutive_failures < policy.unhealthy_failure_threshold
    }

    /// 检查Worker是否可以接受新任务
    pub fn is_available(&self, now: DateTime<Utc>, policy: &HealthPolicy) -> bool {
        self.is_healthy(now, policy) && !self.is_busy()
    }

    /// 负载评分，越小越好
    pub fn load_score(&self) -> f64 {
        let busy = if self.is_busy() { 1.0 } else { 0.0 };
        0.4 * self.average_latency() + 0.3 * busy + 0.3 * (self.average_task_time() / 60.0)
    }

    /// 生成用于展示和持久化的视图
    pub fn snapshot(&self, now: DateTime<Utc>, policy: &HealthPolicy) -> WorkerSnapshot {
        let skip = self.history.len().saturating_sub(SNAPSHOT_HISTORY_ENTRIES);
        WorkerSnapshot {
            id: self.id.clone(),
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            status: self.health,
            last_ping: self.last_probe,
            last_successful_ping: self.last_success,
            consecutive_failures: self.consecutive_failures,
            total_tasks_completed: self.tasks_completed,
            average_response_time: self.average_latency(),
            current_task: self.current_task.clone(),
            processing_power: self.processing_power,
            is_healthy: self.is_healthy(now, policy),
            is_available: self.is_available(now, policy),
            task_history: self.history.iter().skip(skip).cloned().collect(),
            average_task_time: self.average_task_time(),
            success_rate: self.success_rate(),
            load_score: self.load_score(),
        }
    }
}

/// Worker状态视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub status: WorkerHealth,
    pub last_ping: Option<DateTime<Utc>>,
    pub last_successful_ping: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_tasks_completed: u64,
    pub average_response_time: f64,
    pub current_task: Option<String>,
    pub processing_power: f64,
    pub is_healthy: bool,
    pub is_available: bool,
    pub task_history: Vec<TaskOutcomeRecord>,
    pub average_task_time: f64,
    pub success_rate: f64,
    pub load_score: f64,
}

/// Worker汇总统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerSummary {
    pub total_workers: usize,
    pub active_workers: usize,
    pub healthy_workers: usize,
    pub available_workers: usize,
    pub busy_workers: usize,
}
