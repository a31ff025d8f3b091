use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use orchestrator_core::{
    models::{HealthPolicy, Worker, WorkerEndpoint, WorkerHealth, WorkerSnapshot, WorkerSummary},
    OrchestratorError, OrchestratorResult,
};
use tokio::sync::{Mutex, MutexGuard};

/// 注册表锁内的Worker集合，按注册顺序保存
#[derive(Debug)]
pub struct WorkerTable {
    workers: Vec<Worker>,
    policy: HealthPolicy,
}

impl WorkerTable {
    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn get(&self, worker_id: &str) -> Option<&Worker> {
        self.workers.iter().find(|worker| worker.id == worker_id)
    }

    pub fn get_mut(&mut self, worker_id: &str) -> Option<&mut Worker> {
        self.workers.iter_mut().find(|worker| worker.id == worker_id)
    }

    /// 将任务挂到Worker上，Worker已有任务时拒绝
    pub fn assign(&mut self, worker_id: &str, task_id: &str) -> OrchestratorResult<()> {
        let worker = self
            .get_mut(worker_id)
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                id: worker_id.to_string(),
            })?;
        if let Some(current) = &worker.current_task {
            return Err(OrchestratorError::Internal(format!(
                "Worker {worker_id} 正在执行任务 {current}"
            )));
        }
        worker.current_task = Some(task_id.to_string());
        Ok(())
    }

    /// 释放Worker，仅当其当前任务与 `task_id` 一致时生效
    pub fn release(&mut self, worker_id: &str, task_id: &str) -> bool {
        match self.get_mut(worker_id) {
            Some(worker) if worker.current_task.as_deref() == Some(task_id) => {
                worker.current_task = None;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, worker_id: &str, now: DateTime<Utc>) -> Option<WorkerSnapshot> {
        self.get(worker_id)
            .map(|worker| worker.snapshot(now, &self.policy))
    }

    pub fn snapshots(&self, now: DateTime<Utc>) -> BTreeMap<String, WorkerSnapshot> {
        self.workers
            .iter()
            .map(|worker| (worker.id.clone(), worker.snapshot(now, &self.policy)))
            .collect()
    }

    pub fn summary(&self, now: DateTime<Utc>) -> WorkerSummary {
        let mut summary = WorkerSummary {
            total_workers: self.workers.len(),
            ..Default::default()
        };
        for worker in &self.workers {
            if worker.health == WorkerHealth::Active {
                summary.active_workers += 1;
            }
            if worker.is_healthy(now, &self.policy) {
                summary.healthy_workers += 1;
            }
            if worker.is_available(now, &self.policy) {
                summary.available_workers += 1;
            }
            if worker.is_busy() {
                summary.busy_workers += 1;
            }
        }
        summary
    }
}

/// Worker注册表
///
/// 启动时由静态配置构建，运行期间不增删Worker。所有读改写都在同一把锁内完成；
/// 需要同时持有任务存储锁时，必须先获取注册表锁。
#[derive(Debug)]
pub struct WorkerRegistry {
    inner: Mutex<WorkerTable>,
}

impl WorkerRegistry {
    /// 创建注册表，重复ID只保留第一个
    pub fn new(workers: Vec<Worker>, policy: HealthPolicy) -> Self {
        let mut unique: Vec<Worker> = Vec::with_capacity(workers.len());
        for worker in workers {
            if unique.iter().all(|existing| existing.id != worker.id) {
                unique.push(worker);
            }
        }
        Self {
            inner: Mutex::new(WorkerTable {
                workers: unique,
                policy,
            }),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, WorkerTable> {
        self.inner.lock().await
    }

    /// 探测所需的地址列表（锁外使用）
    pub async fn endpoints(&self) -> Vec<(String, WorkerEndpoint)> {
        self.inner
            .lock()
            .await
            .workers
            .iter()
            .map(|worker| (worker.id.clone(), worker.endpoint.clone()))
            .collect()
    }

    pub async fn snapshot(&self, worker_id: &str, now: DateTime<Utc>) -> OrchestratorResult<WorkerSnapshot> {
        self.inner
            .lock()
            .await
            .snapshot(worker_id, now)
            .ok_or_else(|| OrchestratorError::WorkerNotFound {
                id: worker_id.to_string(),
            })
    }

    pub async fn snapshots(&self, now: DateTime<Utc>) -> BTreeMap<String, WorkerSnapshot> {
        self.inner.lock().await.snapshots(now)
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> WorkerSummary {
        self.inner.lock().await.summary(now)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
