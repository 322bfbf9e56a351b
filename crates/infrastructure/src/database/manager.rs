use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ingest_scheduler_core::{
    config::DatabaseConfig,
    traits::{ExecutionRepository, JobActionLogRepository, JobMetadataRepository},
    SchedulerError, SchedulerResult,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::sqlite::{
    SqliteExecutionRepository, SqliteJobActionLogRepository, SqliteJobMetadataRepository,
};

/// SQLite数据库管理器
///
/// 负责创建连接池和建表，并为各仓储提供共享的连接池。
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let mut connect_options = SqliteConnectOptions::from_str(&config.url)
            .map_err(SchedulerError::Database)?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        if config.is_sqlite_in_memory() {
            // 每个连接都是独立的内存库，必须固定为单个永不回收的连接
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));
        }

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(SchedulerError::Database)?;

        info!("数据库连接池创建完成: {}", config.url);
        Ok(Self { pool })
    }

    /// 使用已有连接池（测试和嵌入场景）
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接内存数据库并建表
    pub async fn in_memory() -> SchedulerResult<Self> {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        let manager = Self::new(&config).await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建表和索引，可重复执行
    pub async fn migrate(&self) -> SchedulerResult<()> {
        info!("运行SQLite数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_metadata (
                job_id TEXT PRIMARY KEY,
                display_name TEXT,
                description TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                job_name TEXT NOT NULL,
                status TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                start_timestamp TEXT NOT NULL,
                execution_time REAL,
                progress INTEGER,
                progress_message TEXT,
                current_item TEXT,
                total_items INTEGER,
                processed_items INTEGER,
                is_manual BOOLEAN NOT NULL DEFAULT 0,
                cancel_requested BOOLEAN NOT NULL DEFAULT 0,
                return_value TEXT,
                error_message TEXT,
                traceback TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_action_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                execution_id INTEGER,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_job_executions_job_status_scheduled \
             ON job_executions(job_id, status, scheduled_time)",
            "CREATE INDEX IF NOT EXISTS idx_job_executions_status_start \
             ON job_executions(status, start_timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_job_action_logs_job_id ON job_action_logs(job_id)",
        ];
        for statement in indexes {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;
        }

        debug!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await
    }

    pub fn execution_repository(&self) -> Arc<dyn ExecutionRepository> {
        Arc::new(SqliteExecutionRepository::new(self.pool.clone()))
    }

    pub fn action_log_repository(&self) -> Arc<dyn JobActionLogRepository> {
        Arc::new(SqliteJobActionLogRepository::new(self.pool.clone()))
    }

    pub fn metadata_repository(&self) -> Arc<dyn JobMetadataRepository> {
        Arc::new(SqliteJobMetadataRepository::new(self.pool.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_migrate_is_idempotent() {
        let manager = DatabaseManager::in_memory().await.unwrap();
        manager.migrate().await.unwrap();
        manager.health_check().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'job_%' ORDER BY name",
        )
        .fetch_all(manager.pool())
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["job_action_logs", "job_executions", "job_metadata"]);
    }

    #[tokio::test]
    async fn test_file_database_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler.db");
        let config = DatabaseConfig {
            url: format!("sqlite:{}", path.display()),
            ..DatabaseConfig::default()
        };
        let manager = DatabaseManager::new(&config).await.unwrap();
        manager.migrate().await.unwrap();
        assert!(path.exists());
        manager.close().await;
    }
}
