use std::sync::Arc;

use ingest_scheduler_core::{
    config::DatabaseConfig,
    traits::{ExecutionRepository, JobActionLogRepository, JobMetadataRepository},
    SchedulerResult,
};
use tracing::info;

use crate::database::DatabaseManager;
use crate::memory::{
    InMemoryExecutionRepository, InMemoryJobActionLogRepository, InMemoryJobMetadataRepository,
};

/// 调度器使用的全部仓储
#[derive(Clone)]
pub struct Storage {
    pub executions: Arc<dyn ExecutionRepository>,
    pub action_logs: Arc<dyn JobActionLogRepository>,
    pub metadata: Arc<dyn JobMetadataRepository>,
    database: Option<DatabaseManager>,
}

impl Storage {
    /// 按配置选择SQLite或内存存储，SQLite会先完成建表
    pub async fn connect(config: &DatabaseConfig) -> SchedulerResult<Self> {
        if config.is_memory_backend() {
            info!("使用内存存储，重启后执行记录会丢失");
            return Ok(Self::in_memory());
        }

        let database = DatabaseManager::new(config).await?;
        database.migrate().await?;
        Ok(Self::from_database(database))
    }

    pub fn from_database(database: DatabaseManager) -> Self {
        Self {
            executions: database.execution_repository(),
            action_logs: database.action_log_repository(),
            metadata: database.metadata_repository(),
            database: Some(database),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            executions: Arc::new(InMemoryExecutionRepository::new()),
            action_logs: Arc::new(InMemoryJobActionLogRepository::new()),
            metadata: Arc::new(InMemoryJobMetadataRepository::new()),
            database: None,
        }
    }

    pub fn backend(&self) -> &'static str {
        if self.database.is_some() {
            "sqlite"
        } else {
            "memory"
        }
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        match &self.database {
            Some(database) => database.health_check().await,
            None => Ok(()),
        }
    }

    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}
