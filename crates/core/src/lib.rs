pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::OrchestratorError;
pub use models::*;
pub use traits::*;

/// 编排器统一结果类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
