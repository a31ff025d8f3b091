use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, gauge};
use orchestrator_core::models::{RuntimeCounters, WorkerSummary};

/// 运行时计数器
///
/// 各循环并发更新，使用原子变量避免额外的锁；同时镜像到 `metrics` 指标。
#[derive(Debug)]
pub struct RuntimeStats {
    started_at: Instant,
    total_pings: AtomicU64,
    successful_pings: AtomicU64,
    failed_pings: AtomicU64,
    workers_discovered: AtomicU64,
    workers_lost: AtomicU64,
    tasks_distributed: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_timed_out: AtomicU64,
    tasks_retried: AtomicU64,
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_pings: AtomicU64::new(0),
            successful_pings: AtomicU64::new(0),
            failed_pings: AtomicU64::new(0),
            workers_discovered: AtomicU64::new(0),
            workers_lost: AtomicU64::new(0),
            tasks_distributed: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_timed_out: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
        }
    }

    pub fn record_ping(&self, success: bool) {
        self.total_pings.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_pings.fetch_add(1, Ordering::Relaxed);
            counter!("orchestrator_pings_total", "outcome" => "success").increment(1);
        } else {
            self.failed_pings.fetch_add(1, Ordering::Relaxed);
            counter!("orchestrator_pings_total", "outcome" => "failure").increment(1);
        }
    }

    pub fn record_worker_discovered(&self) {
        self.workers_discovered.fetch_add(1, Ordering::Relaxed);
        counter!("orchestrator_workers_discovered_total").increment(1);
    }

    pub fn record_worker_lost(&self) {
        self.workers_lost.fetch_add(1, Ordering::Relaxed);
        counter!("orchestrator_workers_lost_total").increment(1);
    }

    pub fn record_distributed(&self) {
        self.tasks_distributed.fetch_add(1, Ordering::Relaxed);
        counter!("orchestrator_tasks_distributed_total").increment(1);
    }

    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        counter!("orchestrator_tasks_completed_total").increment(1);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        counter!("orchestrator_tasks_failed_total").increment(1);
    }

    pub fn record_timed_out(&self) {
        self.tasks_timed_out.fetch_add(1, Ordering::Relaxed);
        counter!("orchestrator_tasks_timed_out_total").increment(1);
    }

    pub fn record_retried(&self, count: u64) {
        self.tasks_retried.fetch_add(count, Ordering::Relaxed);
        counter!("orchestrator_tasks_retried_total").increment(count);
    }

    /// 更新Worker相关的瞬时指标
    pub fn update_worker_gauges(&self, summary: &WorkerSummary) {
        gauge!("orchestrator_workers_active").set(summary.active_workers as f64);
        gauge!("orchestrator_workers_healthy").set(summary.healthy_workers as f64);
        gauge!("orchestrator_workers_busy").set(summary.busy_workers as f64);
    }

    pub fn update_queue_gauge(&self, pending: usize) {
        gauge!("orchestrator_pending_tasks").set(pending as f64);
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn counters(&self) -> RuntimeCounters {
        RuntimeCounters {
            total_pings: self.total_pings.load(Ordering::Relaxed),
            successful_pings: self.successful_pings.load(Ordering::Relaxed),
            failed_pings: self.failed_pings.load(Ordering::Relaxed),
            workers_discovered: self.workers_discovered.load(Ordering::Relaxed),
            workers_lost: self.workers_lost.load(Ordering::Relaxed),
            tasks_distributed: self.tasks_distributed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_timed_out: self.tasks_timed_out.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
        }
    }
}
