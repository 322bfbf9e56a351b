//! 调度上下文
//!
//! 组装注册表、协调器、回收器和控制面，替代全局单例。一个进程通常只有一个上下文，
//! 测试中可以并行创建多个互不干扰的实例。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use ingest_scheduler_core::{
    config::AppConfig,
    models::{JobDefinition, JobView},
    traits::HandlerRegistry,
    SchedulerError, SchedulerResult,
};
use ingest_scheduler_infrastructure::{MetricsCollector, Storage};

use crate::controller::{ControlPlane, InstanceInfo};
use crate::coordinator::ExecutionCoordinator;
use crate::reaper::ZombieReaper;
use crate::registry::JobRegistry;

pub struct SchedulerContext {
    config: AppConfig,
    instance: InstanceInfo,
    storage: Storage,
    registry: Arc<JobRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
    reaper: Arc<ZombieReaper>,
    control: Arc<ControlPlane>,
    metrics: Arc<MetricsCollector>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerContext {
    /// 按配置连接存储并注册静态任务
    pub async fn build(config: AppConfig, handlers: HandlerRegistry) -> SchedulerResult<Self> {
        let storage = Storage::connect(&config.database).await?;
        Self::with_storage(config, handlers, storage).await
    }

    /// 使用已有的存储创建上下文
    pub async fn with_storage(
        config: AppConfig,
        handlers: HandlerRegistry,
        storage: Storage,
    ) -> SchedulerResult<Self> {
        let instance = InstanceInfo {
            instance_id: Uuid::new_v4().to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
            started_at: Utc::now(),
        };
        let metrics = Arc::new(MetricsCollector::new());
        let registry = Arc::new(JobRegistry::new(
            handlers,
            config.scheduler.default_timezone.clone(),
        ));

        for job in &config.jobs {
            registry.register(job.clone()).await?;
        }
        let persisted = storage.metadata.list().await?;
        registry.apply_metadata(&persisted).await;
        metrics.set_registered_jobs(registry.len().await);

        let coordinator = ExecutionCoordinator::new(
            registry.clone(),
            storage.executions.clone(),
            metrics.clone(),
            config.scheduler.clone(),
        );
        let reaper = Arc::new(ZombieReaper::new(
            storage.executions.clone(),
            metrics.clone(),
            config.reaper.clone(),
        ));
        let control = Arc::new(ControlPlane::new(
            coordinator.clone(),
            storage.clone(),
            metrics.clone(),
            instance.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(4);

        info!(
            "调度上下文已创建: 实例 {} ({}), 存储 {}, 任务 {} 个",
            instance.instance_id,
            instance.hostname,
            storage.backend(),
            registry.len().await
        );

        Ok(Self {
            config,
            instance,
            storage,
            registry,
            coordinator,
            reaper,
            control,
            metrics,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// 运行时注册额外任务（嵌入方使用），注册后立即参与调度
    pub async fn register_job(&self, job: JobDefinition) -> SchedulerResult<JobView> {
        let view = self.registry.register(job).await?;
        if let Some(metadata) = self.storage.metadata.get(&view.id).await? {
            self.registry.apply_metadata(&[metadata]).await;
        }
        self.metrics.set_registered_jobs(self.registry.len().await);
        self.control.get_job(&view.id).await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance.instance_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.instance.started_at
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.registry.clone()
    }

    pub fn coordinator(&self) -> Arc<ExecutionCoordinator> {
        self.coordinator.clone()
    }

    pub fn reaper(&self) -> Arc<ZombieReaper> {
        self.reaper.clone()
    }

    pub fn control(&self) -> Arc<ControlPlane> {
        self.control.clone()
    }

    /// 启动调度循环和僵尸回收循环
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(SchedulerError::Internal("调度上下文已经启动".to_string()));
        }

        tasks.push(tokio::spawn(
            self.coordinator.clone().run_loop(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.reaper.clone().run_loop(self.shutdown_tx.subscribe()),
        ));
        info!("调度器已启动");
        Ok(())
    }

    /// 停止循环，等待执行中的任务在超时内完成对账，然后关闭存储
    pub async fn shutdown(&self) {
        info!("开始关闭调度器");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!("后台循环异常退出: {}", e);
            }
        }

        let timeout = self.config.scheduler.shutdown_timeout();
        if !self.coordinator.wait_idle(timeout).await {
            warn!(
                "关闭超时 ({}秒)，未完成的执行将由下次启动时的僵尸回收处理",
                timeout.as_secs()
            );
        }

        self.storage.close().await;
        info!("调度器已关闭");
    }
}
