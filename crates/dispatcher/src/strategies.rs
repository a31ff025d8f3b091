use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use orchestrator_core::{
    models::{Task, Worker},
    traits::TaskDispatchStrategy,
};

/// 按负载评分选择Worker，评分相同时选择先注册的
pub struct LoadScoreStrategy;

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl LoadScoreStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadScoreStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDispatchStrategy for LoadScoreStrategy {
    fn select_worker(&self, task: &Task, candidates: &[&Worker]) -> Option<usize> {
        if candidates.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }
        // min_by 在相等时返回第一个元素
        let (index, selected_worker) = candidates.iter().enumerate().min_by(|(_, a), (_, b)| {
            a.load_score()
                .partial_cmp(&b.load_score())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

        debug!(
            task_id = %task.id,
            "负载评分策略选择Worker: {} (评分: {:.3})",
            selected_worker.id,
            selected_worker.load_score()
        );

        Some(index)
    }

    fn name(&self) -> &str {
        "LoadScore"
    }
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskDispatchStrategy for RoundRobinStrategy {
    fn select_worker(&self, task: &Task, candidates: &[&Worker]) -> Option<usize> {
        if candidates.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();

        debug!(
            task_id = %task.id,
            "轮询策略选择Worker: {} (索引: {}/{})",
            candidates[index].id,
            index,
            candidates.len()
        );

        Some(index)
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 根据配置名称创建分派策略
pub fn strategy_from_name(name: &str) -> Option<Arc<dyn TaskDispatchStrategy>> {
    match name {
        "load_score" => Some(Arc::new(LoadScoreStrategy::new())),
        "round_robin" => Some(Arc::new(RoundRobinStrategy::new())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orchestrator_core::models::{TaskParameters, WorkerEndpoint};

    fn worker(id: &str, latency: f64) -> Worker {
        let mut worker = Worker::new(id, WorkerEndpoint::new("127.0.0.1", 5001), 1.0);
        worker.record_probe_success(latency, Utc::now());
        worker
    }

    fn task() -> Task {
        Task::with_id("t1", "benchmark.py", TaskParameters::new(), 1)
    }

    #[test]
    fn test_load_score_picks_minimum() {
        let fast = worker("fast", 0.01);
        let slow = worker("slow", 0.5);
        let candidates = vec![&slow, &fast];
        assert_eq!(LoadScoreStrategy::new().select_worker(&task(), &candidates), Some(1));
    }

    #[test]
    fn test_load_score_ties_go_to_first_registered() {
        let first = worker("first", 0.1);
        let second = worker("second", 0.1);
        let candidates = vec![&first, &second];
        assert_eq!(LoadScoreStrategy::new().select_worker(&task(), &candidates), Some(0));
    }

    #[test]
    fn test_load_score_uses_task_history() {
        let mut busy_history = worker("history", 0.01);
        busy_history.record_task_outcome("old", true, 120.0, Utc::now());
        let fresh = worker("fresh", 0.2);
        let candidates = vec![&busy_history, &fresh];
        // 0.4*0.01 + 0.3*2.0 = 0.604 > 0.4*0.2 = 0.08
        assert_eq!(LoadScoreStrategy::new().select_worker(&task(), &candidates), Some(1));
    }

    #[test]
    fn test_round_robin_cycles() {
        let a = worker("a", 0.1);
        let b = worker("b", 0.1);
        let candidates = vec![&a, &b];
        let strategy = RoundRobinStrategy::new();
        assert_eq!(strategy.select_worker(&task(), &candidates), Some(0));
        assert_eq!(strategy.select_worker(&task(), &candidates), Some(1));
        assert_eq!(strategy.select_worker(&task(), &candidates), Some(0));
    }

    #[test]
    fn test_empty_candidates() {
        assert_eq!(LoadScoreStrategy::new().select_worker(&task(), &[]), None);
        assert_eq!(RoundRobinStrategy::new().select_worker(&task(), &[]), None);
    }

    #[test]
    fn test_strategy_from_name() {
        assert_eq!(strategy_from_name("load_score").unwrap().name(), "LoadScore");
        assert_eq!(strategy_from_name("round_robin").unwrap().name(), "RoundRobin");
        assert!(strategy_from_name("random").is_none());
    }
}
