use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    config::DispatcherConfig,
    models::{DispatchRequest, ExecutionReport, TaskState, TaskUpdate, WorkerEndpoint},
    traits::{available_workers, TaskDispatchStrategy, WorkerClient},
    OrchestratorError, OrchestratorResult,
};
use orchestrator_infrastructure::{TaskStore, WorkerRegistry};

use crate::recovery::{FaultRecovery, TIMEOUT_REASON};
use crate::stats::RuntimeStats;

/// 一次任务分配
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: String,
    pub worker_id: String,
    pub endpoint: WorkerEndpoint,
    /// 分配时任务的重试次数，用于识别过期的执行结果
    pub attempt: u32,
    pub request: DispatchRequest,
}

/// 任务分发器
///
/// 每轮先执行超时检测和重试扫描，再把pending任务分配给可用Worker。
/// 每个分配在独立的并发单元中完成网络分发和结果等待，分发循环本身从不阻塞在运行中的任务上。
pub struct Distributor {
    registry: Arc<WorkerRegistry>,
    tasks: Arc<TaskStore>,
    client: Arc<dyn WorkerClient>,
    strategy: Arc<dyn TaskDispatchStrategy>,
    recovery: Arc<FaultRecovery>,
    stats: Arc<RuntimeStats>,
    config: DispatcherConfig,
}

impl Distributor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tasks: Arc<TaskStore>,
        client: Arc<dyn WorkerClient>,
        strategy: Arc<dyn TaskDispatchStrategy>,
        recovery: Arc<FaultRecovery>,
        stats: Arc<RuntimeStats>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            tasks,
            client,
            strategy,
            recovery,
            stats,
            config,
        }
    }

    /// 在同一临界区内为可用Worker分配pending任务
    pub async fn assign_pending(&self, now: DateTime<Utc>) -> Vec<Assignment> {
        let mut workers = self.registry.lock().await;
        let mut tasks = self.tasks.lock().await;
        let mut assignments = Vec::new();

        loop {
            let policy = *workers.policy();
            let candidate_count = available_workers(workers.workers(), now, &policy).len();
            if candidate_count == 0 {
                break;
            }
            let Some(task) = tasks.next_pending() else {
                break;
            };

            let selected = {
                let candidates = available_workers(workers.workers(), now, &policy);
                self.strategy
                    .select_worker(&task, &candidates)
                    .and_then(|index| candidates.get(index))
                    .map(|worker| (worker.id.clone(), worker.endpoint.clone()))
            };
            let Some((worker_id, endpoint)) = selected else {
                tasks.restore(&task.id);
                break;
            };

            if let Err(e) = workers.assign(&worker_id, &task.id) {
                warn!(task_id = %task.id, worker_id = %worker_id, "分配Worker失败: {}", e);
                tasks.restore(&task.id);
                break;
            }
            if let Err(e) = tasks.transition(
                &task.id,
                TaskState::Assigned,
                TaskUpdate::assigned_to(worker_id.clone()),
                now,
            ) {
                warn!(task_id = %task.id, "任务状态转换失败: {}", e);
                workers.release(&worker_id, &task.id);
                continue;
            }

            self.stats.record_distributed();
            info!(
                task_id = %task.id,
                worker_id = %worker_id,
                priority = task.priority,
                "任务已分配"
            );
            assignments.push(Assignment {
                request: DispatchRequest::from(&task),
                task_id: task.id,
                worker_id,
                endpoint,
                attempt: task.retry_count,
            });
        }

        assignments
    }

    /// 向Worker分发任务并等待执行结果（锁外执行）
    ///
    /// Worker在计算结束后才响应，任务在请求发出前进入running，
    /// 这样超时扫描可以覆盖整个计算过程。
    pub async fn dispatch(&self, assignment: Assignment) {
        let Assignment {
            task_id,
            worker_id,
            endpoint,
            attempt,
            request,
        } = assignment;

        let execution = match self.client.dispatch(&endpoint, &request).await {
            Ok(execution) => execution,
            Err(e) => {
                warn!(task_id = %task_id, worker_id = %worker_id, "任务分发失败: {}", e);
                self.fail_dispatch(&task_id, &worker_id, attempt, &e.to_string(), Utc::now())
                    .await;
                return;
            }
        };

        if !self.mark_running(&task_id, &worker_id, attempt, Utc::now()).await {
            return;
        }

        match execution.await {
            Err(e) if e.is_dispatch_failure() => {
                warn!(task_id = %task_id, worker_id = %worker_id, "任务分发失败: {}", e);
                self.fail_dispatch(&task_id, &worker_id, attempt, &e.to_string(), Utc::now())
                    .await;
            }
            result => {
                self.complete(&task_id, &worker_id, attempt, result, Utc::now())
                    .await;
            }
        }
    }

    /// 将已分配的任务置为running，任务已不属于该次分配时返回false
    pub async fn mark_running(
        &self,
        task_id: &str,
        worker_id: &str,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let mut tasks = self.tasks.lock().await;
        let current = tasks.get(task_id).is_some_and(|task| {
            task.status == TaskState::Assigned
                && task.assigned_worker.as_deref() == Some(worker_id)
                && task.retry_count == attempt
        });
        if !current {
            debug!(task_id = %task_id, "任务在发出请求前已变更，忽略");
            return false;
        }
        match tasks.transition(task_id, TaskState::Running, TaskUpdate::default(), now) {
            Ok(_) => {
                debug!(task_id = %task_id, worker_id = %worker_id, "任务开始执行");
                true
            }
            Err(e) => {
                warn!(task_id = %task_id, "任务状态转换失败: {}", e);
                false
            }
        }
    }

    /// 分发失败（请求未送达Worker）：任务直接失败并立即释放Worker，不计入Worker的任务历史
    pub async fn fail_dispatch(
        &self,
        task_id: &str,
        worker_id: &str,
        attempt: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut workers = self.registry.lock().await;
        let mut tasks = self.tasks.lock().await;

        let current = tasks.get(task_id).is_some_and(|task| {
            matches!(task.status, TaskState::Assigned | TaskState::Running)
                && task.assigned_worker.as_deref() == Some(worker_id)
                && task.retry_count == attempt
        });
        if !current {
            debug!(task_id = %task_id, worker_id = %worker_id, "任务已变更，忽略过期的分发失败");
            return false;
        }

        let failed = tasks
            .transition(
                task_id,
                TaskState::Failed,
                TaskUpdate::failed(format!("dispatch failed: {error}")),
                now,
            )
            .is_ok();
        workers.release(worker_id, task_id);
        if failed {
            self.stats.record_failed();
        }
        failed
    }

    /// 处理执行结果，过期结果（任务已不在running或已属于其他分配）被丢弃
    pub async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        attempt: u32,
        result: OrchestratorResult<ExecutionReport>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut workers = self.registry.lock().await;
        let mut tasks = self.tasks.lock().await;

        let current = tasks.get(task_id).is_some_and(|task| {
            task.status == TaskState::Running
                && task.assigned_worker.as_deref() == Some(worker_id)
                && task.retry_count == attempt
        });
        if !current {
            debug!(task_id = %task_id, worker_id = %worker_id, "丢弃过期的执行结果");
            return false;
        }

        let mut timed_out = false;
        let (next, update) = match result {
            Ok(report) if report.success => (
                TaskState::Completed,
                TaskUpdate::completed(report.payload, report.execution_time),
            ),
            Ok(report) => (
                TaskState::Failed,
                TaskUpdate {
                    error: Some(report.failure_message()),
                    execution_time: report.execution_time,
                    result: Some(report.payload),
                    ..Default::default()
                },
            ),
            // 请求自身的超时上限晚于超时扫描，只有扫描未及时运行时才会走到这里
            Err(OrchestratorError::Timeout(_)) => {
                timed_out = true;
                (TaskState::Failed, TaskUpdate::failed(TIMEOUT_REASON))
            }
            Err(e) => (TaskState::Failed, TaskUpdate::failed(e.to_string())),
        };

        let task = match tasks.transition(task_id, next, update, now) {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %task_id, "任务状态转换失败: {}", e);
                return false;
            }
        };
        let execution_time = task.execution_time.unwrap_or(0.0);
        let success = next == TaskState::Completed;

        if let Some(worker) = workers.get_mut(worker_id) {
            worker.record_task_outcome(task_id, success, execution_time, now);
        }
        workers.release(worker_id, task_id);

        if success {
            self.stats.record_completed();
            info!(
                task_id = %task_id,
                worker_id = %worker_id,
                execution_time,
                "任务执行完成"
            );
        } else {
            if timed_out {
                self.stats.record_timed_out();
            }
            self.stats.record_failed();
            warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                "任务执行失败: {}",
                task.error.as_deref().unwrap_or("unknown")
            );
        }
        true
    }

    /// 执行一轮分发，返回本轮分配的任务
    pub async fn run_cycle(self: &Arc<Self>) -> Vec<Assignment> {
        let now = Utc::now();
        self.recovery.check_timeouts(now).await;
        self.recovery.requeue_failed().await;

        let assignments = self.assign_pending(now).await;
        for assignment in assignments.iter().cloned() {
            let distributor = Arc::clone(self);
            tokio::spawn(async move {
                distributor.dispatch(assignment).await;
            });
        }
        assignments
    }

    /// 分发循环，直到收到关闭信号
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "启动任务分发器，策略: {}，分发间隔: {}秒",
            self.strategy.name(),
            self.config.distribution_interval_seconds
        );
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.distribution_interval_seconds,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let distributor = Arc::clone(&self);
                    // 单轮中的panic不能终止循环
                    if let Err(e) = tokio::spawn(async move { distributor.run_cycle().await }).await {
                        error!("任务分发执行异常: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止任务分发器");
                    break;
                }
            }
        }
    }
}
