//! 任务编排引擎
//!
//! 健康监控、任务分发、故障恢复和文件任务接入各自作为独立的周期性循环运行，
//! 共享Worker注册表和任务存储。[`Orchestrator`] 负责组装这些组件并管理它们的生命周期。

pub mod distributor;
pub mod health_monitor;
pub mod intake;
pub mod orchestrator;
pub mod recovery;
pub mod stats;
pub mod strategies;
pub mod test_utils;

pub use distributor::{Assignment, Distributor};
pub use health_monitor::{HealthCycleReport, HealthMonitor, ProbeOutcome};
pub use intake::{FileReport, ProcessedCache, TaskIntake};
pub use orchestrator::{Orchestrator, CANCELLED_REASON};
pub use recovery::{fail_tasks_of_lost_worker, FaultRecovery, TIMEOUT_REASON, WORKER_LOST_REASON};
pub use stats::RuntimeStats;
pub use strategies::*;
