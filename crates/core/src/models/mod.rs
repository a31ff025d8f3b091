//! # 数据模型
//!
//! 编排器的核心数据结构：Worker、任务以及与Worker通信的消息格式。
//!
//! ## 核心模型
//!
//! ### Worker - 远程执行节点
//! 记录节点地址、健康状态、探测延迟窗口和任务执行历史，
//! 由Worker注册表独占持有。
//!
//! ### Task - 任务
//! 一次计算请求，包含算法标识、透传参数、优先级和生命周期状态，
//! 由任务存储独占持有。
//!
//! ### ExecutionReport - 执行结果
//! Worker `POST /execute` 响应体的解析结果。
//!
//! ## 状态管理
//!
//! ### 任务状态流转
//! ```text
//! pending → assigned → running → completed
//!    ↑         ↓          ↓
//!    └────── failed ←─────┘      (retry_count < max_retries 时重试)
//!
//! pending | assigned | running → cancelled
//! ```
//!
//! ### Worker健康状态
//! ```text
//! unknown → active ⇄ unstable → inactive
//!             ↑__________________│  (探测成功即恢复)
//! ```
//!
//! Worker之间、任务与Worker之间的引用（`task.assigned_worker`、
//! `worker.current_task`）只是标识符，必须在同一临界区内同时维护。

pub mod message;
pub mod stats;
pub mod task;
pub mod worker;

pub use message::*;
pub use stats::*;
pub use task::*;
pub use worker::*;
