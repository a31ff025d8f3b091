use crate::models::{HealthPolicy, Task, Worker};
use chrono::{DateTime, Utc};

/// 任务分派策略接口
///
/// 在注册表锁内调用，实现中不能做任何I/O。
pub trait TaskDispatchStrategy: Send + Sync {
    /// 从候选Worker中选择一个执行任务，返回其在 `candidates` 中的下标
    fn select_worker(&self, task: &Task, candidates: &[&Worker]) -> Option<usize>;

    /// 获取策略名称
    fn name(&self) -> &str;
}

/// 按注册顺序列出当前可用的Worker
pub fn available_workers<'a>(
    workers: &'a [Worker],
    now: DateTime<Utc>,
    policy: &HealthPolicy,
) -> Vec<&'a Worker> {
    workers
        .iter()
        .filter(|worker| worker.is_available(now, policy))
        .collect()
}
