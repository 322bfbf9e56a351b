//! 协作式取消
//!
//! 操作员取消执行时只会在账本上设置 `cancel_requested`，不会强制终止任务。
//! 处理器在安全检查点调用 [`ExecutionContext::report_progress`]，该调用写入
//! 进度并检查取消标记；已请求取消时返回 [`ExecutionCancelled`]，处理器必须用
//! `?` 向上传递，协调器随后把记录标记为已取消的失败状态。
//!
//! 从不上报进度的处理器无法被取消。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{ProgressUpdate, CANCELLED_ERROR_MESSAGE};
use crate::traits::ExecutionRepository;

/// 取消信号
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{CANCELLED_ERROR_MESSAGE} (执行记录: {execution_id}, 任务: {job_id})")]
pub struct ExecutionCancelled {
    pub execution_id: i64,
    pub job_id: String,
}

/// 绑定到单次执行记录的处理器上下文
#[derive(Clone)]
pub struct ExecutionContext {
    execution_id: i64,
    job_id: String,
    scheduled_time: DateTime<Utc>,
    is_manual: bool,
    executions: Arc<dyn ExecutionRepository>,
}

impl ExecutionContext {
    pub fn new(
        execution_id: i64,
        job_id: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        is_manual: bool,
        executions: Arc<dyn ExecutionRepository>,
    ) -> Self {
        Self {
            execution_id,
            job_id: job_id.into(),
            scheduled_time,
            is_manual,
            executions,
        }
    }

    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        self.scheduled_time
    }

    pub fn is_manual(&self) -> bool {
        self.is_manual
    }

    /// 上报进度百分比并检查取消标记
    pub async fn report_progress(
        &self,
        percent: u8,
        message: Option<&str>,
    ) -> Result<(), ExecutionCancelled> {
        let mut update = ProgressUpdate::percent(percent);
        update.message = message.map(str::to_string);
        self.report(update).await
    }

    /// 上报完整进度信息并检查取消标记
    ///
    /// 账本写入失败只记录日志，不影响处理器继续执行。
    pub async fn report(&self, update: ProgressUpdate) -> Result<(), ExecutionCancelled> {
        match self.executions.record_progress(self.execution_id, &update).await {
            Ok(Some(ack)) if ack.cancel_requested => {
                warn!(
                    "任务 {} 收到取消请求，即将停止 (执行记录: {})",
                    self.job_id, self.execution_id
                );
                Err(self.cancelled())
            }
            Ok(Some(ack)) => {
                if !ack.still_running {
                    debug!(
                        "执行记录 {} 已不处于运行状态，进度未写入",
                        self.execution_id
                    );
                }
                Ok(())
            }
            Ok(None) => {
                warn!("执行记录 {} 不存在，忽略进度上报", self.execution_id);
                Ok(())
            }
            Err(e) => {
                warn!("更新任务进度失败 (执行记录: {}): {}", self.execution_id, e);
                Ok(())
            }
        }
    }

    /// 只检查取消标记，不写入进度
    pub async fn check_cancelled(&self) -> Result<(), ExecutionCancelled> {
        match self.executions.get_by_id(self.execution_id).await {
            Ok(Some(record)) if record.cancel_requested => Err(self.cancelled()),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("读取取消标记失败 (执行记录: {}): {}", self.execution_id, e);
                Ok(())
            }
        }
    }

    fn cancelled(&self) -> ExecutionCancelled {
        ExecutionCancelled {
            execution_id: self.execution_id,
            job_id: self.job_id.clone(),
        }
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.execution_id)
            .field("job_id", &self.job_id)
            .field("scheduled_time", &self.scheduled_time)
            .field("is_manual", &self.is_manual)
            .finish()
    }
}
