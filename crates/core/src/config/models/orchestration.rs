use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{
    HealthPolicy, Worker, WorkerEndpoint, DEFAULT_LATENCY_WINDOW, DEFAULT_LOST_FAILURE_CEILING,
    DEFAULT_STALENESS_SECONDS, DEFAULT_TASK_HISTORY_LIMIT, DEFAULT_UNHEALTHY_FAILURE_THRESHOLD,
};

fn default_processing_power() -> f64 {
    1.0
}

/// 静态配置的Worker节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerEndpointConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_processing_power")]
    pub processing_power: f64,
}

impl WorkerEndpointConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            processing_power: default_processing_power(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.trim().is_empty() {
            return Err(anyhow::anyhow!("Worker ID不能为空"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow::anyhow!("Worker {} 的主机地址不能为空", self.id));
        }
        if self.port == 0 {
            return Err(anyhow::anyhow!("Worker {} 的端口不能为0", self.id));
        }
        if self.processing_power.is_nan() || self.processing_power <= 0.0 {
            return Err(anyhow::anyhow!("Worker {} 的处理能力权重必须大于0", self.id));
        }
        Ok(())
    }

    /// 根据配置构造注册表中的Worker
    pub fn build(&self, latency_window: usize, history_limit: usize) -> Worker {
        Worker::new(
            self.id.clone(),
            WorkerEndpoint::new(self.host.clone(), self.port),
            self.processing_power,
        )
        .with_windows(latency_window, history_limit)
    }
}

/// 校验Worker列表：非空且ID唯一
pub fn validate_workers(workers: &[WorkerEndpointConfig]) -> anyhow::Result<()> {
    if workers.is_empty() {
        return Err(anyhow::anyhow!("至少需要配置一个Worker"));
    }
    let mut seen = HashSet::new();
    for worker in workers {
        worker.validate()?;
        if !seen.insert(worker.id.as_str()) {
            return Err(anyhow::anyhow!("Worker ID重复: {}", worker.id));
        }
    }
    Ok(())
}

/// 健康监控配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub ping_interval_seconds: u64,
    pub probe_timeout_seconds: u64,
    /// 连续失败达到该值后判定Worker丢失
    pub max_ping_failures: u32,
    pub unhealthy_failure_threshold: u32,
    pub staleness_seconds: i64,
    pub latency_window: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            ping_interval_seconds: 5,
            probe_timeout_seconds: 10,
            max_ping_failures: DEFAULT_LOST_FAILURE_CEILING,
            unhealthy_failure_threshold: DEFAULT_UNHEALTHY_FAILURE_THRESHOLD,
            staleness_seconds: DEFAULT_STALENESS_SECONDS,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ping_interval_seconds == 0 {
            return Err(anyhow::anyhow!("探测间隔必须大于0"));
        }
        if self.probe_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("探测超时时间必须大于0"));
        }
        if self.max_ping_failures == 0 {
            return Err(anyhow::anyhow!("最大探测失败次数必须大于0"));
        }
        if self.unhealthy_failure_threshold == 0 {
            return Err(anyhow::anyhow!("不健康失败阈值必须大于0"));
        }
        if self.staleness_seconds <= 0 {
            return Err(anyhow::anyhow!("健康过期时间必须大于0"));
        }
        if self.latency_window == 0 {
            return Err(anyhow::anyhow!("延迟窗口大小必须大于0"));
        }
        Ok(())
    }

    pub fn policy(&self) -> HealthPolicy {
        HealthPolicy {
            staleness_seconds: self.staleness_seconds,
            unhealthy_failure_threshold: self.unhealthy_failure_threshold,
        }
    }
}

/// 任务分发配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub distribution_interval_seconds: u64,
    pub task_timeout_seconds: i64,
    pub dispatch_timeout_seconds: u64,
    pub default_max_retries: u32,
    pub task_history_limit: usize,
    pub dispatch_strategy: String, // "load_score", "round_robin"
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            distribution_interval_seconds: 2,
            task_timeout_seconds: 60,
            dispatch_timeout_seconds: 10,
            default_max_retries: crate::models::DEFAULT_MAX_RETRIES,
            task_history_limit: DEFAULT_TASK_HISTORY_LIMIT,
            dispatch_strategy: "load_score".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub const STRATEGIES: [&'static str; 2] = ["load_score", "round_robin"];

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.distribution_interval_seconds == 0 {
            return Err(anyhow::anyhow!("分发间隔必须大于0"));
        }
        if self.task_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }
        if self.dispatch_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("分发超时时间必须大于0"));
        }
        if self.task_history_limit == 0 {
            return Err(anyhow::anyhow!("任务历史保留条数必须大于0"));
        }
        if !Self::STRATEGIES.contains(&self.dispatch_strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的调度策略: {}，支持的策略: {:?}",
                self.dispatch_strategy,
                Self::STRATEGIES
            ));
        }
        Ok(())
    }
}
