use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    config::HealthConfig,
    models::{ProbeFailureEffect, StateSnapshot, WorkerHealth},
    traits::{SnapshotSink, WorkerClient},
};
use orchestrator_infrastructure::{TaskStore, WorkerRegistry};

use crate::recovery::fail_tasks_of_lost_worker;
use crate::stats::RuntimeStats;

/// 单个Worker的探测结果
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub worker_id: String,
    /// 成功时为往返延迟（秒），失败时为错误描述
    pub result: Result<f64, String>,
}

impl ProbeOutcome {
    pub fn success(worker_id: impl Into<String>, latency_seconds: f64) -> Self {
        Self {
            worker_id: worker_id.into(),
            result: Ok(latency_seconds),
        }
    }

    pub fn failure(worker_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            result: Err(error.into()),
        }
    }
}

/// 一轮健康检查的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCycleReport {
    pub probed: usize,
    pub recovered: Vec<String>,
    pub lost: Vec<String>,
    pub failed_tasks: Vec<String>,
}

/// 健康监控
///
/// 周期性地探测所有Worker，更新注册表中的健康状态，处理丢失的Worker，
/// 并在每轮结束后输出状态快照。单个Worker的探测失败不会影响其他Worker。
pub struct HealthMonitor {
    registry: Arc<WorkerRegistry>,
    tasks: Arc<TaskStore>,
    client: Arc<dyn WorkerClient>,
    stats: Arc<RuntimeStats>,
    sink: Option<Arc<dyn SnapshotSink>>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tasks: Arc<TaskStore>,
        client: Arc<dyn WorkerClient>,
        stats: Arc<RuntimeStats>,
        sink: Option<Arc<dyn SnapshotSink>>,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            tasks,
            client,
            stats,
            sink,
            config,
        }
    }

    /// 并发探测所有Worker（不持有任何锁）
    pub async fn probe_all(&self) -> Vec<ProbeOutcome> {
        let endpoints = self.registry.endpoints().await;
        let probes = endpoints.into_iter().map(|(worker_id, endpoint)| {
            let client = Arc::clone(&self.client);
            async move {
                let started = Instant::now();
                match client.ping(&endpoint).await {
                    Ok(_) => ProbeOutcome::success(worker_id, started.elapsed().as_secs_f64()),
                    Err(e) => ProbeOutcome::failure(worker_id, e.to_string()),
                }
            }
        });
        join_all(probes).await
    }

    /// 将探测结果写回注册表，处理丢失的Worker
    pub async fn apply_probe_results(
        &self,
        outcomes: Vec<ProbeOutcome>,
        now: DateTime<Utc>,
    ) -> HealthCycleReport {
        let mut report = HealthCycleReport {
            probed: outcomes.len(),
            ..Default::default()
        };

        let mut workers = self.registry.lock().await;
        let mut tasks = self.tasks.lock().await;

        for outcome in outcomes {
            let Some(worker) = workers.get_mut(&outcome.worker_id) else {
                warn!(worker_id = %outcome.worker_id, "探测结果对应的Worker不存在");
                continue;
            };

            match outcome.result {
                Ok(latency) => {
                    self.stats.record_ping(true);
                    let previous = worker.health;
                    if worker.record_probe_success(latency, now) {
                        if matches!(previous, WorkerHealth::Unknown | WorkerHealth::Inactive) {
                            self.stats.record_worker_discovered();
                        }
                        info!(
                            worker_id = %outcome.worker_id,
                            previous = %previous,
                            latency_ms = latency * 1000.0,
                            "Worker已上线"
                        );
                        report.recovered.push(outcome.worker_id);
                    }
                }
                Err(error) => {
                    self.stats.record_ping(false);
                    match worker.record_probe_failure(now, self.config.max_ping_failures) {
                        ProbeFailureEffect::Lost => {
                            self.stats.record_worker_lost();
                            warn!(
                                worker_id = %outcome.worker_id,
                                failures = worker.consecutive_failures,
                                "Worker丢失: {}",
                                error
                            );
                            let failed = fail_tasks_of_lost_worker(
                                &mut workers,
                                &mut tasks,
                                &outcome.worker_id,
                                now,
                                &self.stats,
                            );
                            report.failed_tasks.extend(failed);
                            report.lost.push(outcome.worker_id);
                        }
                        ProbeFailureEffect::Degraded => {
                            debug!(
                                worker_id = %outcome.worker_id,
                                failures = worker.consecutive_failures,
                                "Worker探测失败: {}",
                                error
                            );
                        }
                        ProbeFailureEffect::Inactive => {
                            debug!(worker_id = %outcome.worker_id, "Worker仍不可达: {}", error);
                        }
                    }
                }
            }
        }

        let summary = workers.summary(now);
        self.stats.update_worker_gauges(&summary);
        self.stats.update_queue_gauge(tasks.pending_count());

        report
    }

    /// 执行一轮健康检查
    pub async fn run_cycle(&self) -> HealthCycleReport {
        let outcomes = self.probe_all().await;
        let now = Utc::now();
        let report = self.apply_probe_results(outcomes, now).await;
        self.write_snapshot(now).await;
        report
    }

    /// 构建当前状态快照
    pub async fn snapshot(&self, now: DateTime<Utc>) -> StateSnapshot {
        let workers = self.registry.snapshots(now).await;
        let task_stats = self.tasks.stats().await;
        StateSnapshot {
            timestamp: now,
            workers,
            stats: self.stats.counters(),
            task_stats,
        }
    }

    async fn write_snapshot(&self, now: DateTime<Utc>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let snapshot = self.snapshot(now).await;
        if let Err(e) = sink.write_state(&snapshot).await {
            warn!("写入Worker状态快照失败: {}", e);
        }
    }

    /// 健康检查循环，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动健康监控，探测间隔: {}秒",
            self.config.ping_interval_seconds
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.ping_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let monitor = Arc::clone(&self);
                    // 单轮中的panic不能终止循环
                    match tokio::spawn(async move { monitor.run_cycle().await }).await {
                        Ok(report) => {
                            if !report.lost.is_empty() {
                                warn!("本轮健康检查丢失Worker: {:?}", report.lost);
                            }
                        }
                        Err(e) => error!("健康检查执行异常: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止健康监控");
                    break;
                }
            }
        }
    }
}
