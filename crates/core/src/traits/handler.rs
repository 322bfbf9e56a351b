//! 任务处理器接口定义
//!
//! 处理器是调度核心之外的业务逻辑（数据同步、通知推送等），以名称注册到
//! [`HandlerRegistry`]，任务定义通过 `handler` 字段引用。
//!
//! ```rust,ignore
//! use ingest_scheduler_core::traits::{handler_fn, HandlerError};
//!
//! let handler = handler_fn(|ctx, kwargs| async move {
//!     for (i, item) in items(&kwargs).iter().enumerate() {
//!         // 在安全检查点上报进度，收到取消信号时必须向上传递
//!         ctx.report_progress(percent(i), Some("同步中")).await?;
//!         sync_one(item).await.map_err(HandlerError::from)?;
//!     }
//!     Ok(None)
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::cancellation::{ExecutionCancelled, ExecutionContext};
use crate::models::JobKwargs;
use crate::SchedulerError;

/// 处理器执行失败
#[derive(Debug, Error)]
pub enum HandlerError {
    /// 处理器在上报进度时收到取消信号并向上传递
    #[error(transparent)]
    Cancelled(#[from] ExecutionCancelled),

    #[error("{message}")]
    Failed {
        message: String,
        traceback: Option<String>,
    },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        HandlerError::Failed {
            message: message.into(),
            traceback: Some(traceback.into()),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        HandlerError::Failed {
            message: e.to_string(),
            traceback: Some(format!("{e:?}")),
        }
    }
}

impl From<SchedulerError> for HandlerError {
    fn from(e: SchedulerError) -> Self {
        HandlerError::failed(e.to_string())
    }
}

/// 处理器返回值，成功时可以携带任意JSON结果
pub type HandlerResult = Result<Option<serde_json::Value>, HandlerError>;

/// 任务处理器
///
/// 每次调用获得一个绑定到本次执行记录的 [`ExecutionContext`]，以及合并了
/// 默认参数和手动触发参数的 `kwargs`。
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: ExecutionContext, kwargs: JobKwargs) -> HandlerResult;
}

/// 基于闭包的处理器
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(ExecutionContext, JobKwargs) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn run(&self, ctx: ExecutionContext, kwargs: JobKwargs) -> HandlerResult {
        (self.0)(ctx, kwargs).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(ExecutionContext, JobKwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// 处理器注册表，按名称查找处理器
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn JobHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let mut registry = self.handlers.write().await;
        registry.insert(name.into(), handler);
    }

    pub async fn register_batch(&self, handlers: Vec<(String, Arc<dyn JobHandler>)>) {
        let mut registry = self.handlers.write().await;
        for (name, handler) in handlers {
            registry.insert(name, handler);
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        let registry = self.handlers.read().await;
        registry.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        let registry = self.handlers.read().await;
        registry.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        let registry = self.handlers.read().await;
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }
}
