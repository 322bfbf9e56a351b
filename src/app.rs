use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::info;

use ingest_scheduler_core::{config::AppConfig, traits::HandlerRegistry};
use ingest_scheduler_dispatcher::{ControlPlane, SchedulerContext};

use crate::handlers::builtin_handlers;

/// 主应用程序
pub struct Application {
    context: SchedulerContext,
}

impl Application {
    /// 使用内置处理器创建应用
    pub async fn new(config: AppConfig) -> Result<Self> {
        Self::with_handlers(config, builtin_handlers().await).await
    }

    /// 使用嵌入方提供的处理器创建应用
    pub async fn with_handlers(config: AppConfig, handlers: HandlerRegistry) -> Result<Self> {
        info!(
            "初始化应用程序: 存储 {}, 静态任务 {} 个",
            config.database.url,
            config.jobs.len()
        );
        let context = SchedulerContext::build(config, handlers)
            .await
            .context("初始化调度上下文失败")?;
        Ok(Self { context })
    }

    pub fn control(&self) -> Arc<ControlPlane> {
        self.context.control()
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.context
    }

    /// 运行直到收到关闭信号，然后排空执行中的任务
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.context.start().await.context("启动调度器失败")?;

        for job in self.control().list_jobs().await {
            info!(
                "任务 {} ({}) 触发器 {}，下次执行: {}",
                job.id,
                job.display_name,
                job.trigger,
                job.next_fire_time
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "已暂停".to_string())
            );
        }

        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");
        self.context.shutdown().await;
        Ok(())
    }
}
