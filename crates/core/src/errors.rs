use thiserror::Error;

/// 任务队列错误类型定义
#[derive(Debug, Error)]
pub enum TaskQueueError {
    #[error("队列存储错误: {0}")]
    Store(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("任务ID已存在: {id}")]
    DuplicateTask { id: String },

    #[error("未知的任务类型: {0}")]
    UnknownTaskType(String),

    #[error("无效的任务优先级: {0}")]
    InvalidPriority(u8),

    #[error("无效的任务载荷: {0}")]
    InvalidPayload(String),

    #[error("任务处理失败: {0}")]
    Handler(String),

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("任务类型 {0} 已注册处理器")]
    DuplicateHandler(String),

    #[error("Worker实例已存在: {name}")]
    InstanceExists { name: String },

    #[error("Worker实例未找到: {name}")]
    InstanceNotFound { name: String },

    #[error("Worker实例已在运行: {name}")]
    AlreadyRunning { name: String },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for TaskQueueError {
    fn from(err: serde_json::Error) -> Self {
        TaskQueueError::Serialization(err.to_string())
    }
}

impl TaskQueueError {
    /// 是否为存储连接类错误（Worker循环遇到此类错误会继续轮询）
    pub fn is_store_error(&self) -> bool {
        matches!(self, TaskQueueError::Store(_))
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, TaskQueueError>;
