use async_trait::async_trait;
use ingest_scheduler_core::{
    models::JobMetadata, traits::JobMetadataRepository, SchedulerError, SchedulerResult,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteJobMetadataRepository {
    pool: SqlitePool,
}

impl SqliteJobMetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_metadata(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<JobMetadata> {
        Ok(JobMetadata {
            job_id: row.try_get("job_id")?,
            display_name: row.try_get("display_name")?,
            description: row.try_get("description")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl JobMetadataRepository for SqliteJobMetadataRepository {
    async fn get(&self, job_id: &str) -> SchedulerResult<Option<JobMetadata>> {
        let row = sqlx::query(
            "SELECT job_id, display_name, description, updated_at FROM job_metadata WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_metadata(&row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> SchedulerResult<Vec<JobMetadata>> {
        let rows = sqlx::query(
            "SELECT job_id, display_name, description, updated_at FROM job_metadata ORDER BY job_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_metadata).collect()
    }

    #[instrument(skip(self, metadata), fields(job_id = %metadata.job_id))]
    async fn upsert(&self, metadata: &JobMetadata) -> SchedulerResult<JobMetadata> {
        let row = sqlx::query(
            r#"
            INSERT INTO job_metadata (job_id, display_name, description, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT(job_id) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, job_metadata.display_name),
                description = COALESCE(excluded.description, job_metadata.description),
                updated_at = excluded.updated_at
            RETURNING job_id, display_name, description, updated_at
            "#,
        )
        .bind(&metadata.job_id)
        .bind(&metadata.display_name)
        .bind(&metadata.description)
        .bind(metadata.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        debug!("保存任务元数据成功: {}", metadata.job_id);
        Self::row_to_metadata(&row)
    }
}
