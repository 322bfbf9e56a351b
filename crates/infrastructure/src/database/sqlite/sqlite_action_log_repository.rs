use async_trait::async_trait;
use ingest_scheduler_core::{
    models::{ActionStatus, JobAction, JobActionLog},
    traits::JobActionLogRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub struct SqliteJobActionLogRepository {
    pool: SqlitePool,
}

impl SqliteJobActionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<JobActionLog> {
        let action: String = row.try_get("action")?;
        let status: String = row.try_get("status")?;
        Ok(JobActionLog {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            execution_id: row.try_get("execution_id")?,
            action: JobAction::parse(&action).ok_or_else(|| {
                SchedulerError::DatabaseOperation(format!("未知的操作类型: {action}"))
            })?,
            status: ActionStatus::parse(&status).ok_or_else(|| {
                SchedulerError::DatabaseOperation(format!("未知的操作状态: {status}"))
            })?,
            error_message: row.try_get("error_message")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}

#[async_trait]
impl JobActionLogRepository for SqliteJobActionLogRepository {
    #[instrument(skip(self, entry), fields(job_id = %entry.job_id, action = %entry.action))]
    async fn append(&self, entry: &JobActionLog) -> SchedulerResult<JobActionLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_action_logs (job_id, execution_id, action, status, error_message, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, job_id, execution_id, action, status, error_message, timestamp
            "#,
        )
        .bind(&entry.job_id)
        .bind(entry.execution_id)
        .bind(entry.action.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(entry.timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Self::row_to_log(&row)
    }

    async fn list(
        &self,
        job_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> SchedulerResult<Vec<JobActionLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, execution_id, action, status, error_message, timestamp
            FROM job_action_logs
            WHERE ($1 IS NULL OR job_id = $1)
            ORDER BY timestamp DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_log).collect()
    }

    async fn count(&self, job_id: Option<&str>) -> SchedulerResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total FROM job_action_logs WHERE ($1 IS NULL OR job_id = $1)",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(row.try_get("total")?)
    }
}
