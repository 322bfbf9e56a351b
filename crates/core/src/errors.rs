use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("任务已存在: {id}")]
    DuplicateJob { id: String },

    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: i64 },

    #[error("执行记录 {id} 不处于运行状态 (当前状态: {status})")]
    ExecutionNotRunning { id: i64, status: String },

    #[error("执行记录 {id} 正在运行，不能删除")]
    ExecutionStillRunning { id: i64 },

    #[error("任务 {id} 已达到最大并发实例数 {max_instances}")]
    JobAlreadyRunning { id: String, max_instances: u32 },

    #[error("任务处理器未注册: {name}")]
    HandlerNotFound { name: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的时区: {0}")]
    InvalidTimezone(String),

    #[error("无效的触发器配置: {0}")]
    InvalidTrigger(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 是否为操作员调用错误（同步返回给调用方，不产生任何状态变更）
    pub fn is_operator_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNotFound { .. }
                | SchedulerError::ExecutionNotFound { .. }
                | SchedulerError::ExecutionNotRunning { .. }
                | SchedulerError::ExecutionStillRunning { .. }
                | SchedulerError::JobAlreadyRunning { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
