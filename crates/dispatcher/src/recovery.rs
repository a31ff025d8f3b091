use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use orchestrator_core::models::{TaskState, TaskUpdate};
use orchestrator_infrastructure::{TaskStore, TaskTable, WorkerRegistry, WorkerTable};

use crate::stats::RuntimeStats;

/// 超时任务的失败原因
pub const TIMEOUT_REASON: &str = "timeout";
/// Worker丢失时任务的失败原因
pub const WORKER_LOST_REASON: &str = "worker lost";

/// 故障恢复
///
/// - 超时检测：running超过任务超时时间的任务标记为失败并释放Worker
/// - Worker丢失：丢失Worker上的任务立即标记为失败
/// - 重试扫描：可重试的失败任务重新进入pending队列
pub struct FaultRecovery {
    registry: Arc<WorkerRegistry>,
    tasks: Arc<TaskStore>,
    stats: Arc<RuntimeStats>,
    task_timeout: Duration,
}

impl FaultRecovery {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        tasks: Arc<TaskStore>,
        stats: Arc<RuntimeStats>,
        task_timeout_seconds: i64,
    ) -> Self {
        Self {
            registry,
            tasks,
            stats,
            task_timeout: Duration::seconds(task_timeout_seconds),
        }
    }

    /// 检查超时任务，返回被判定超时的任务ID
    pub async fn check_timeouts(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut workers = self.registry.lock().await;
        let mut tasks = self.tasks.lock().await;

        let expired: Vec<(String, Option<String>, f64)> = tasks
            .running()
            .into_iter()
            .filter_map(|task| {
                let started_at = task.started_at?;
                let elapsed = now - started_at;
                (elapsed > self.task_timeout).then(|| {
                    (
                        task.id.clone(),
                        task.assigned_worker.clone(),
                        elapsed.num_milliseconds() as f64 / 1000.0,
                    )
                })
            })
            .collect();

        let mut timed_out = Vec::with_capacity(expired.len());
        for (task_id, worker_id, elapsed) in expired {
            if let Err(e) = tasks.transition(
                &task_id,
                TaskState::Failed,
                TaskUpdate::failed(TIMEOUT_REASON),
                now,
            ) {
                warn!(task_id = %task_id, "标记超时任务失败: {}", e);
                continue;
            }

            if let Some(worker_id) = worker_id {
                if let Some(worker) = workers.get_mut(&worker_id) {
                    worker.record_task_outcome(task_id.clone(), false, elapsed, now);
                }
                workers.release(&worker_id, &task_id);
            }

            self.stats.record_timed_out();
            self.stats.record_failed();
            warn!(task_id = %task_id, elapsed_seconds = elapsed, "任务执行超时");
            timed_out.push(task_id);
        }

        timed_out
    }

    /// 重试扫描，返回重新入队的任务ID
    pub async fn requeue_failed(&self) -> Vec<String> {
        let requeued = self.tasks.lock().await.requeue_failed();
        if !requeued.is_empty() {
            self.stats.record_retried(requeued.len() as u64);
            for task_id in &requeued {
                info!(task_id = %task_id, "失败任务重新入队");
            }
        }
        requeued
    }
}

/// 处理丢失的Worker：其上的任务标记为失败并清空Worker的当前任务
///
/// 调用方必须已经按顺序持有注册表锁和任务存储锁。
pub fn fail_tasks_of_lost_worker(
    workers: &mut WorkerTable,
    tasks: &mut TaskTable,
    worker_id: &str,
    now: DateTime<Utc>,
    stats: &RuntimeStats,
) -> Vec<String> {
    let held: Vec<String> = tasks
        .held_by(worker_id)
        .into_iter()
        .map(|task| task.id.clone())
        .collect();

    let mut failed = Vec::with_capacity(held.len());
    for task_id in held {
        match tasks.transition(
            &task_id,
            TaskState::Failed,
            TaskUpdate::failed(WORKER_LOST_REASON),
            now,
        ) {
            Ok(_) => {
                stats.record_failed();
                warn!(task_id = %task_id, worker_id = %worker_id, "Worker丢失，任务标记为失败");
                failed.push(task_id);
            }
            Err(e) => warn!(task_id = %task_id, "标记任务失败时出错: {}", e),
        }
    }

    if let Some(worker) = workers.get_mut(worker_id) {
        worker.current_task = None;
    }

    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::{HealthPolicy, NewTask, TaskParameters, Worker, WorkerEndpoint};

    async fn setup() -> (FaultRecovery, Arc<WorkerRegistry>, Arc<TaskStore>, String, DateTime<Utc>) {
        let registry = Arc::new(WorkerRegistry::new(
            vec![Worker::new("w1", WorkerEndpoint::new("127.0.0.1", 5001), 1.0)],
            HealthPolicy::default(),
        ));
        let tasks = Arc::new(TaskStore::new(3));
        let stats = Arc::new(RuntimeStats::new());
        let recovery = FaultRecovery::new(registry.clone(), tasks.clone(), stats, 60);

        let task_id = tasks
            .submit(NewTask {
                algorithm: "benchmark.py".to_string(),
                parameters: TaskParameters::new(),
                priority: 1,
            })
            .await
            .unwrap();

        let started_at = Utc::now();
        {
            let mut workers = registry.lock().await;
            let mut table = tasks.lock().await;
            table.next_pending();
            workers.assign("w1", &task_id).unwrap();
            table
                .transition(&task_id, TaskState::Assigned, TaskUpdate::assigned_to("w1"), started_at)
                .unwrap();
            table
                .transition(&task_id, TaskState::Running, TaskUpdate::default(), started_at)
                .unwrap();
        }

        (recovery, registry, tasks, task_id, started_at)
    }

    #[tokio::test]
    async fn test_timeout_boundary() {
        let (recovery, registry, tasks, task_id, started_at) = setup().await;

        assert!(recovery
            .check_timeouts(started_at + Duration::seconds(60))
            .await
            .is_empty());

        let timed_out = recovery.check_timeouts(started_at + Duration::seconds(61)).await;
        assert_eq!(timed_out, vec![task_id.clone()]);

        let task = tasks.get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some(TIMEOUT_REASON));
        assert_eq!(task.assigned_worker, None);

        let workers = registry.lock().await;
        let worker = workers.get("w1").unwrap();
        assert!(worker.current_task.is_none());
        assert_eq!(worker.history.len(), 1);
        assert!(!worker.history[0].success);
    }

    #[tokio::test]
    async fn test_requeue_after_timeout() {
        let (recovery, _registry, tasks, task_id, started_at) = setup().await;
        recovery.check_timeouts(started_at + Duration::seconds(90)).await;

        assert_eq!(recovery.requeue_failed().await, vec![task_id.clone()]);
        let task = tasks.get(&task_id).await.unwrap();
        assert_eq!(task.status, TaskState::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error.as_deref(), Some(TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn test_lost_worker_fails_task() {
        let (_recovery, registry, tasks, task_id, started_at) = setup().await;
        let stats = RuntimeStats::new();

        let mut workers = registry.lock().await;
        let mut table = tasks.lock().await;
        let failed = fail_tasks_of_lost_worker(&mut workers, &mut table, "w1", started_at, &stats);

        assert_eq!(failed, vec![task_id.clone()]);
        assert_eq!(table.get(&task_id).unwrap().error.as_deref(), Some(WORKER_LOST_REASON));
        assert!(workers.get("w1").unwrap().current_task.is_none());
        assert_eq!(stats.counters().tasks_failed, 1);
    }
}
