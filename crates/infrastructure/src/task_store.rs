use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use orchestrator_core::{
    models::{NewTask, Task, TaskState, TaskStats, TaskUpdate, DEFAULT_MAX_RETRIES},
    OrchestratorError, OrchestratorResult,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// 优先队列条目：优先级高者先出，同优先级按入队顺序
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    seq: u64,
    task_id: String,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct TaskRecord {
    task: Task,
    /// 最近一次入队的序号，放回队列时沿用
    seq: u64,
}

/// 任务存储锁内的数据
#[derive(Debug)]
pub struct TaskTable {
    records: HashMap<String, TaskRecord>,
    /// 提交顺序，用于列表输出
    order: Vec<String>,
    queue: BinaryHeap<QueueEntry>,
    next_seq: u64,
    default_max_retries: u32,
}

impl TaskTable {
    fn new(default_max_retries: u32) -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            queue: BinaryHeap::new(),
            next_seq: 0,
            default_max_retries,
        }
    }

    fn enqueue(&mut self, task_id: &str, priority: i32, seq: u64) {
        self.queue.push(QueueEntry {
            priority,
            seq,
            task_id: task_id.to_string(),
        });
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// 提交新任务，返回任务ID
    pub fn submit(&mut self, request: NewTask) -> OrchestratorResult<String> {
        request.validate()?;
        let task = Task::new(request.algorithm, request.parameters, request.priority)
            .with_max_retries(self.default_max_retries);
        let task_id = task.id.clone();
        self.insert(task)?;
        Ok(task_id)
    }

    /// 插入一个已构造的pending任务，ID重复时拒绝
    pub fn insert(&mut self, task: Task) -> OrchestratorResult<()> {
        if self.records.contains_key(&task.id) {
            return Err(OrchestratorError::DuplicateTask { id: task.id });
        }
        if task.status != TaskState::Pending {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "新任务 {} 必须处于pending状态",
                task.id
            )));
        }

        let seq = self.allocate_seq();
        self.enqueue(&task.id, task.priority, seq);
        self.order.push(task.id.clone());
        self.records.insert(task.id.clone(), TaskRecord { task, seq });
        Ok(())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.records.contains_key(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<&Task> {
        self.records.get(task_id).map(|record| &record.task)
    }

    /// 弹出优先级最高且仍为pending的任务，失效条目直接丢弃
    pub fn next_pending(&mut self) -> Option<Task> {
        while let Some(entry) = self.queue.pop() {
            match self.records.get(&entry.task_id) {
                Some(record) if record.task.status == TaskState::Pending && record.seq == entry.seq => {
                    return Some(record.task.clone());
                }
                _ => debug!(task_id = %entry.task_id, "丢弃失效的队列条目"),
            }
        }
        None
    }

    /// 将弹出但未能分配的任务放回队列，保持原有顺序
    pub fn restore(&mut self, task_id: &str) {
        if let Some(record) = self.records.get(task_id) {
            if record.task.status == TaskState::Pending {
                let (priority, seq) = (record.task.priority, record.seq);
                self.enqueue(task_id, priority, seq);
            }
        }
    }

    /// 原子地执行状态转换
    pub fn transition(
        &mut self,
        task_id: &str,
        next: TaskState,
        update: TaskUpdate,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<&Task> {
        let record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })?;
        record.task.apply_transition(next, update, now)?;
        Ok(&record.task)
    }

    /// 重试扫描：可重试的失败任务重新入队，返回被重试的任务ID
    pub fn requeue_failed(&mut self) -> Vec<String> {
        let candidates: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(|record| record.task.can_retry()))
            .cloned()
            .collect();

        let mut requeued = Vec::with_capacity(candidates.len());
        for task_id in candidates {
            let seq = self.allocate_seq();
            let Some(record) = self.records.get_mut(&task_id) else {
                continue;
            };
            if record.task.requeue().is_err() {
                continue;
            }
            record.seq = seq;
            let priority = record.task.priority;
            self.enqueue(&task_id, priority, seq);
            requeued.push(task_id);
        }
        requeued
    }

    /// 所有处于running状态的任务
    pub fn running(&self) -> Vec<&Task> {
        self.tasks()
            .filter(|task| task.status == TaskState::Running)
            .collect()
    }

    /// 分配给指定Worker的未完成任务
    pub fn held_by(&self, worker_id: &str) -> Vec<&Task> {
        self.tasks()
            .filter(|task| {
                task.status.holds_worker() && task.assigned_worker.as_deref() == Some(worker_id)
            })
            .collect()
    }

    /// 按提交顺序遍历任务
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).map(|record| &record.task))
    }

    pub fn pending_count(&self) -> usize {
        self.tasks()
            .filter(|task| task.status == TaskState::Pending)
            .count()
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats::from_tasks(self.tasks(), self.pending_count())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 任务存储
///
/// 独占持有所有任务记录和pending优先队列。任务在进程生命周期内不会被删除。
#[derive(Debug)]
pub struct TaskStore {
    inner: Mutex<TaskTable>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl TaskStore {
    pub fn new(default_max_retries: u32) -> Self {
        Self {
            inner: Mutex::new(TaskTable::new(default_max_retries)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.inner.lock().await
    }

    pub async fn submit(&self, request: NewTask) -> OrchestratorResult<String> {
        self.inner.lock().await.submit(request)
    }

    pub async fn insert(&self, task: Task) -> OrchestratorResult<()> {
        self.inner.lock().await.insert(task)
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.inner.lock().await.contains(task_id)
    }

    pub async fn get(&self, task_id: &str) -> OrchestratorResult<Task> {
        self.inner
            .lock()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    pub async fn list(&self) -> Vec<Task> {
        self.inner.lock().await.tasks().cloned().collect()
    }

    pub async fn stats(&self) -> TaskStats {
        self.inner.lock().await.stats()
    }
}
