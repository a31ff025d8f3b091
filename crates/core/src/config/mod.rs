//! 编排器配置
//!
//! 配置由可选的TOML文件和 `ORCHESTRATOR__` 前缀的环境变量组成，
//! 例如 `ORCHESTRATOR__DISPATCHER__TASK_TIMEOUT_SECONDS=120`。
//! 每个配置段都实现了 `Default` 和 `validate()`，只有配置错误会在启动时终止进程。

pub mod models;

pub use models::*;
