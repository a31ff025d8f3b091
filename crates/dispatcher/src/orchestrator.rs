use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use orchestrator_core::{
    models::{
        IntakeStats, NewTask, ResultsSnapshot, SystemStatistics, Task, TaskOverview, TaskState,
        TaskStatusView, TaskUpdate, WorkerOverview, WorkerStatusView,
    },
    traits::{SnapshotSink, WorkerClient},
    AppConfig, OrchestratorError, OrchestratorResult,
};
use orchestrator_infrastructure::{TaskStore, WorkerRegistry};

use crate::distributor::Distributor;
use crate::health_monitor::HealthMonitor;
use crate::intake::TaskIntake;
use crate::recovery::FaultRecovery;
use crate::stats::RuntimeStats;
use crate::strategies::strategy_from_name;

/// 取消任务时记录的原因
pub const CANCELLED_REASON: &str = "任务已被取消";

/// 编排器
///
/// 持有Worker注册表、任务存储和各个后台循环，对外提供任务提交与状态查询接口。
/// 运行期故障只体现在任务和Worker的状态上，只有输入错误会作为 `Err` 返回给调用方。
pub struct Orchestrator {
    config: AppConfig,
    registry: Arc<WorkerRegistry>,
    tasks: Arc<TaskStore>,
    stats: Arc<RuntimeStats>,
    monitor: Arc<HealthMonitor>,
    distributor: Arc<Distributor>,
    recovery: Arc<FaultRecovery>,
    intake: Option<Arc<TaskIntake>>,
    sink: Option<Arc<dyn SnapshotSink>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        client: Arc<dyn WorkerClient>,
        sink: Option<Arc<dyn SnapshotSink>>,
    ) -> OrchestratorResult<Self> {
        config
            .validate()
            .map_err(|e| OrchestratorError::Configuration(format!("{e:#}")))?;

        let strategy = strategy_from_name(&config.dispatcher.dispatch_strategy).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "未知的调度策略: {}",
                config.dispatcher.dispatch_strategy
            ))
        })?;

        let workers = config
            .workers
            .iter()
            .map(|worker| {
                worker.build(
                    config.health.latency_window,
                    config.dispatcher.task_history_limit,
                )
            })
            .collect();
        let registry = Arc::new(WorkerRegistry::new(workers, config.health.policy()));
        let tasks = Arc::new(TaskStore::new(config.dispatcher.default_max_retries));
        let stats = Arc::new(RuntimeStats::new());

        let recovery = Arc::new(FaultRecovery::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            Arc::clone(&stats),
            config.dispatcher.task_timeout_seconds,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            Arc::clone(&client),
            Arc::clone(&stats),
            sink.clone(),
            config.health.clone(),
        ));
        let distributor = Arc::new(Distributor::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            client,
            strategy,
            Arc::clone(&recovery),
            Arc::clone(&stats),
            config.dispatcher.clone(),
        ));
        let intake = config.intake.enabled.then(|| {
            Arc::new(TaskIntake::new(
                Arc::clone(&tasks),
                config.intake.clone(),
                config.dispatcher.default_max_retries,
            ))
        });

        info!(
            "编排器初始化完成，Worker数量: {}，调度策略: {}",
            config.workers.len(),
            config.dispatcher.dispatch_strategy
        );

        Ok(Self {
            config,
            registry,
            tasks,
            stats,
            monitor,
            distributor,
            recovery,
            intake,
            sink,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn runtime_stats(&self) -> &Arc<RuntimeStats> {
        &self.stats
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    pub fn recovery(&self) -> &Arc<FaultRecovery> {
        &self.recovery
    }

    pub fn intake(&self) -> Option<&Arc<TaskIntake>> {
        self.intake.as_ref()
    }

    /// 提交任务，返回任务ID
    pub async fn submit(&self, request: NewTask) -> OrchestratorResult<String> {
        let priority = request.priority;
        let algorithm = request.algorithm.clone();
        let task_id = self.tasks.submit(request).await?;
        info!(task_id = %task_id, algorithm = %algorithm, priority, "任务已提交");
        Ok(task_id)
    }

    /// 查询单个任务，或所有任务及聚合统计
    pub async fn task_status(&self, task_id: Option<&str>) -> OrchestratorResult<TaskStatusView> {
        match task_id {
            Some(task_id) => {
                let task = self.tasks.get(task_id).await?;
                Ok(TaskStatusView::Single(Box::new(task)))
            }
            None => {
                let table = self.tasks.lock().await;
                Ok(TaskStatusView::All(TaskOverview {
                    tasks: table.tasks().cloned().collect(),
                    statistics: table.stats(),
                }))
            }
        }
    }

    /// 查询单个Worker，或所有Worker及汇总
    pub async fn worker_status(
        &self,
        worker_id: Option<&str>,
    ) -> OrchestratorResult<WorkerStatusView> {
        let now = Utc::now();
        match worker_id {
            Some(worker_id) => {
                let snapshot = self.registry.snapshot(worker_id, now).await?;
                Ok(WorkerStatusView::Single(Box::new(snapshot)))
            }
            None => {
                let workers = self.registry.lock().await;
                Ok(WorkerStatusView::All(WorkerOverview {
                    workers: workers.snapshots(now),
                    summary: workers.summary(now),
                }))
            }
        }
    }

    pub async fn statistics(&self) -> SystemStatistics {
        SystemStatistics::new(
            self.stats.counters(),
            self.stats.uptime_seconds(),
            self.tasks.stats().await,
        )
    }

    /// 取消任务；已分配Worker的任务会同时释放该Worker
    pub async fn cancel(&self, task_id: &str) -> OrchestratorResult<Task> {
        let mut workers = self.registry.lock().await;
        let mut tasks = self.tasks.lock().await;

        let held_by = tasks
            .get(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })?
            .assigned_worker
            .clone();

        let task = tasks
            .transition(
                task_id,
                TaskState::Cancelled,
                TaskUpdate {
                    error: Some(CANCELLED_REASON.to_string()),
                    ..Default::default()
                },
                Utc::now(),
            )?
            .clone();

        if let Some(worker_id) = held_by {
            workers.release(&worker_id, task_id);
        }
        info!(task_id = %task_id, "任务已取消");
        Ok(task)
    }

    pub async fn intake_stats(&self) -> Option<IntakeStats> {
        match &self.intake {
            Some(intake) => Some(intake.stats().await),
            None => None,
        }
    }

    /// 导出所有任务结果，未配置输出时返回None
    pub async fn dump_results(&self) -> OrchestratorResult<Option<PathBuf>> {
        let Some(sink) = &self.sink else {
            return Ok(None);
        };
        let snapshot = ResultsSnapshot {
            timestamp: Utc::now(),
            tasks: self.tasks.list().await,
            statistics: self.statistics().await,
        };
        let path = sink.write_results(&snapshot).await?;
        info!(path = %path.display(), tasks = snapshot.tasks.len(), "任务结果已导出");
        Ok(Some(path))
    }

    /// 输出一行运行统计
    pub async fn log_statistics(&self) {
        let summary = self.registry.summary(Utc::now()).await;
        let statistics = self.statistics().await;
        info!(
            "系统统计 - 在线Worker: {}/{}，健康Worker: {}，探测成功率: {:.1}%，已完成任务: {}/{}",
            summary.active_workers,
            summary.total_workers,
            summary.healthy_workers,
            statistics.ping_success_rate * 100.0,
            statistics.task_statistics.completed,
            statistics.task_statistics.total_tasks
        );
    }

    /// 启动所有后台循环
    pub async fn start(self: &Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut handles = self.handles.lock().await;

        handles.push(tokio::spawn(
            Arc::clone(&self.monitor).run(shutdown_tx.subscribe()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.distributor).run(shutdown_tx.subscribe()),
        ));
        if let Some(intake) = &self.intake {
            handles.push(tokio::spawn(Arc::clone(intake).run(shutdown_tx.subscribe())));
        }
        if self.sink.is_some() {
            handles.push(tokio::spawn(
                Arc::clone(self).results_loop(shutdown_tx.subscribe()),
            ));
        }
        handles.push(tokio::spawn(
            Arc::clone(self).stats_loop(shutdown_tx.subscribe()),
        ));

        info!("编排器已启动，后台循环数量: {}", handles.len());
    }

    /// 等待所有后台循环退出
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台循环异常退出: {}", e);
            }
        }
        info!("编排器已停止");
    }

    async fn results_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.snapshot.results_interval_seconds);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.dump_results().await {
                        warn!("导出任务结果失败: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    }

    async fn stats_loop(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.config.observability.stats_log_interval_seconds);
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.log_statistics().await,
                _ = shutdown_rx.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_config, MockWorkerClient};
    use orchestrator_core::models::TaskParameters;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(test_config(2), Arc::new(MockWorkerClient::default()), None).unwrap()
    }

    fn request(algorithm: &str) -> NewTask {
        NewTask {
            algorithm: algorithm.to_string(),
            parameters: TaskParameters::new(),
            priority: 1,
        }
    }

    #[test]
    fn test_empty_worker_set_is_fatal() {
        let mut config = test_config(1);
        config.workers.clear();
        let result = Orchestrator::new(config, Arc::new(MockWorkerClient::default()), None);
        assert!(matches!(result, Err(OrchestratorError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_algorithm() {
        let orchestrator = orchestrator();
        let result = orchestrator.submit(request("  ")).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidTaskParams(_))));
    }

    #[tokio::test]
    async fn test_task_status_views() {
        let orchestrator = orchestrator();
        let task_id = orchestrator.submit(request("benchmark.py")).await.unwrap();

        match orchestrator.task_status(Some(&task_id)).await.unwrap() {
            TaskStatusView::Single(task) => assert_eq!(task.status, TaskState::Pending),
            other => panic!("unexpected view: {other:?}"),
        }
        match orchestrator.task_status(None).await.unwrap() {
            TaskStatusView::All(overview) => {
                assert_eq!(overview.tasks.len(), 1);
                assert_eq!(overview.statistics.pending, 1);
            }
            other => panic!("unexpected view: {other:?}"),
        }
        assert!(matches!(
            orchestrator.task_status(Some("missing")).await,
            Err(OrchestratorError::TaskNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_worker_status_views() {
        let orchestrator = orchestrator();
        match orchestrator.worker_status(None).await.unwrap() {
            WorkerStatusView::All(overview) => {
                assert_eq!(overview.workers.len(), 2);
                assert_eq!(overview.summary.total_workers, 2);
                assert_eq!(overview.summary.active_workers, 0);
            }
            other => panic!("unexpected view: {other:?}"),
        }
        assert!(matches!(
            orchestrator.worker_status(Some("worker-9")).await,
            Err(OrchestratorError::WorkerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_and_terminal() {
        let orchestrator = orchestrator();
        let task_id = orchestrator.submit(request("benchmark.py")).await.unwrap();

        let cancelled = orchestrator.cancel(&task_id).await.unwrap();
        assert_eq!(cancelled.status, TaskState::Cancelled);
        assert_eq!(cancelled.error.as_deref(), Some(CANCELLED_REASON));
        assert!(orchestrator.tasks().lock().await.next_pending().is_none());

        assert!(matches!(
            orchestrator.cancel(&task_id).await,
            Err(OrchestratorError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_dump_results_without_sink() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.dump_results().await.unwrap(), None);
        assert!(orchestrator.intake_stats().await.is_none());
    }
}
