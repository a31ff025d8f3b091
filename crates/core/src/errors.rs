use thiserror::Error;

/// 编排器错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("任务已存在: {id}")]
    DuplicateTask { id: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("无效的状态转换: 任务 {id} 从 {from} 到 {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    /// 请求未送达Worker（连接失败、Worker拒绝接收）
    #[error("分发失败: {0}")]
    Dispatch(String),

    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl OrchestratorError {
    /// 任务是否从未送达Worker，此类失败不计入Worker的任务历史
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(self, OrchestratorError::Dispatch(_))
    }
}
