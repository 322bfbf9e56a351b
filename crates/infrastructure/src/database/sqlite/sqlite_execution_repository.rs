use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_scheduler_core::{
    models::{
        ExecutionCompletion, ExecutionFilter, ExecutionRecord, ExecutionStatus,
        ExecutionStatusSummary, JobExecutionStats, LastExecution, ProgressAck, ProgressUpdate,
    },
    traits::ExecutionRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, instrument};

const EXECUTION_COLUMNS: &str = "id, job_id, job_name, status, scheduled_time, start_timestamp, \
     execution_time, progress, progress_message, current_item, total_items, processed_items, \
     is_manual, cancel_requested, return_value, error_message, traceback, updated_at";

pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<ExecutionRecord> {
        let progress: Option<i64> = row.try_get("progress")?;
        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            job_name: row.try_get("job_name")?,
            status: row.try_get("status")?,
            scheduled_time: row.try_get("scheduled_time")?,
            start_timestamp: row.try_get("start_timestamp")?,
            execution_time: row.try_get("execution_time")?,
            progress: progress.map(|p| p.clamp(0, 100) as u8),
            progress_message: row.try_get("progress_message")?,
            current_item: row.try_get("current_item")?,
            total_items: row.try_get("total_items")?,
            processed_items: row.try_get("processed_items")?,
            is_manual: row.try_get("is_manual")?,
            cancel_requested: row.try_get("cancel_requested")?,
            return_value: row.try_get("return_value")?,
            error_message: row.try_get("error_message")?,
            traceback: row.try_get("traceback")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn push_filter<'a>(builder: &mut QueryBuilder<'a, Sqlite>, filter: &'a ExecutionFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(job_id) = &filter.job_id {
            builder.push(" AND job_id = ").push_bind(job_id.as_str());
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(is_manual) = filter.is_manual {
            builder.push(" AND is_manual = ").push_bind(is_manual);
        }
    }
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, record), fields(job_id = %record.job_id, status = %record.status))]
    async fn create(&self, record: &ExecutionRecord) -> SchedulerResult<ExecutionRecord> {
        let sql = format!(
            r#"
            INSERT INTO job_executions (job_id, job_name, status, scheduled_time, start_timestamp,
                execution_time, progress, progress_message, current_item, total_items,
                processed_items, is_manual, cancel_requested, return_value, error_message,
                traceback, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {EXECUTION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&record.job_id)
            .bind(&record.job_name)
            .bind(record.status)
            .bind(record.scheduled_time)
            .bind(record.start_timestamp)
            .bind(record.execution_time)
            .bind(record.progress.map(i64::from))
            .bind(&record.progress_message)
            .bind(&record.current_item)
            .bind(record.total_items)
            .bind(record.processed_items)
            .bind(record.is_manual)
            .bind(record.cancel_requested)
            .bind(&record.return_value)
            .bind(&record.error_message)
            .bind(&record.traceback)
            .bind(record.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        let created = Self::row_to_record(&row)?;
        debug!("创建{}成功, 状态: {}", created.entity_description(), created.status);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ExecutionRecord>> {
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM job_executions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &ExecutionFilter) -> SchedulerResult<Vec<ExecutionRecord>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions"
        ));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY start_timestamp DESC, id DESC");
        // SQLite 的 OFFSET 必须跟在 LIMIT 之后，-1 表示不限制
        builder
            .push(" LIMIT ")
            .push_bind(filter.limit.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0));

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn count(&self, filter: &ExecutionFilter) -> SchedulerResult<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM job_executions");
        Self::push_filter(&mut builder, filter);

        let row = builder
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
        Ok(row.try_get("total")?)
    }

    async fn find_latest_running(
        &self,
        job_id: &str,
        started_after: DateTime<Utc>,
    ) -> SchedulerResult<Option<ExecutionRecord>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions \
             WHERE job_id = $1 AND status = 'running' AND start_timestamp >= $2 \
             ORDER BY start_timestamp DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(job_id)
            .bind(started_after)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_stale_running(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionRecord>> {
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM job_executions \
             WHERE status = 'running' AND start_timestamp < $1 \
             ORDER BY start_timestamp ASC, id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(started_before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self, completion), fields(status = %completion.status))]
    async fn complete_if_running(
        &self,
        id: i64,
        completion: &ExecutionCompletion,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_executions
            SET status = $2,
                execution_time = $3,
                return_value = COALESCE($4, return_value),
                error_message = COALESCE($5, error_message),
                traceback = COALESCE($6, traceback),
                progress = COALESCE($7, progress),
                updated_at = $8
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(completion.status)
        .bind(completion.execution_time)
        .bind(&completion.return_value)
        .bind(&completion.error_message)
        .bind(&completion.traceback)
        .bind(completion.progress.map(i64::from))
        .bind(completion.finished_at)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let applied = result.rows_affected() > 0;
        debug!("执行记录 {} 终态写入: {}", id, applied);
        Ok(applied)
    }

    async fn record_progress(
        &self,
        id: i64,
        update: &ProgressUpdate,
    ) -> SchedulerResult<Option<ProgressAck>> {
        let updated = sqlx::query(
            r#"
            UPDATE job_executions
            SET progress = $2,
                progress_message = COALESCE($3, progress_message),
                current_item = COALESCE($4, current_item),
                total_items = COALESCE($5, total_items),
                processed_items = COALESCE($6, processed_items),
                updated_at = $7
            WHERE id = $1 AND status = 'running'
            RETURNING cancel_requested
            "#,
        )
        .bind(id)
        .bind(i64::from(update.progress.min(100)))
        .bind(&update.message)
        .bind(&update.current_item)
        .bind(update.total_items)
        .bind(update.processed_items)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if let Some(row) = updated {
            return Ok(Some(ProgressAck {
                still_running: true,
                cancel_requested: row.try_get("cancel_requested")?,
            }));
        }

        let row = sqlx::query("SELECT cancel_requested FROM job_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(ProgressAck {
                still_running: false,
                cancel_requested: row.try_get("cancel_requested")?,
            })),
            None => Ok(None),
        }
    }

    async fn request_cancel(&self, id: i64) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE job_executions SET cancel_requested = 1, updated_at = $2 \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_if_terminal(&self, id: i64) -> SchedulerResult<bool> {
        let result =
            sqlx::query("DELETE FROM job_executions WHERE id = $1 AND status != 'running'")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;

        if result.rows_affected() > 0 {
            debug!("删除执行记录成功: ID {}", id);
        }
        Ok(result.rows_affected() > 0)
    }

    async fn job_stats(&self, job_id: &str) -> SchedulerResult<JobExecutionStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total FROM job_executions WHERE job_id = $1 GROUP BY status",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let mut summary = ExecutionStatusSummary::default();
        for row in &rows {
            let status: ExecutionStatus = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            summary.add(status, total);
        }

        let avg_row = sqlx::query(
            "SELECT AVG(execution_time) AS avg_time FROM job_executions \
             WHERE job_id = $1 AND status = 'success' AND execution_time IS NOT NULL",
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;
        let avg_execution_time: Option<f64> = avg_row.try_get("avg_time")?;

        let last_row = sqlx::query(
            "SELECT id, status, start_timestamp, execution_time FROM job_executions \
             WHERE job_id = $1 ORDER BY start_timestamp DESC, id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let last_execution = match last_row {
            Some(row) => Some(LastExecution {
                id: row.try_get("id")?,
                status: row.try_get("status")?,
                start_timestamp: row.try_get("start_timestamp")?,
                execution_time: row.try_get("execution_time")?,
            }),
            None => None,
        };

        Ok(JobExecutionStats {
            job_id: job_id.to_string(),
            total: summary.total(),
            running: summary.running,
            success: summary.success,
            failed: summary.failed,
            missed: summary.missed,
            avg_execution_time,
            last_execution,
        })
    }

    async fn status_summary(&self) -> SchedulerResult<ExecutionStatusSummary> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM job_executions GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        let mut summary = ExecutionStatusSummary::default();
        for row in &rows {
            let status: ExecutionStatus = row.try_get("status")?;
            let total: i64 = row.try_get("total")?;
            summary.add(status, total);
        }
        Ok(summary)
    }
}
