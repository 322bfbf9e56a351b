//! 进程内存储
//!
//! 与SQLite仓储实现相同的接口和条件更新语义，用于测试以及 `database.url = "memory"`
//! 的部署（重启后数据丢失）。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ingest_scheduler_core::{
    models::{
        ExecutionCompletion, ExecutionFilter, ExecutionRecord, ExecutionStatus,
        ExecutionStatusSummary, JobActionLog, JobExecutionStats, JobMetadata, LastExecution,
        ProgressAck, ProgressUpdate,
    },
    traits::{ExecutionRepository, JobActionLogRepository, JobMetadataRepository},
    SchedulerResult,
};
use tokio::sync::Mutex;

#[derive(Default)]
struct ExecutionTable {
    records: BTreeMap<i64, ExecutionRecord>,
    next_id: i64,
}

/// 内存执行账本
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    table: Arc<Mutex<ExecutionTable>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// 开始时间倒序，相同时按ID倒序
fn newest_first(a: &ExecutionRecord, b: &ExecutionRecord) -> std::cmp::Ordering {
    b.start_timestamp
        .cmp(&a.start_timestamp)
        .then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, record: &ExecutionRecord) -> SchedulerResult<ExecutionRecord> {
        let mut table = self.table.lock().await;
        table.next_id += 1;
        let mut created = record.clone();
        created.id = table.next_id;
        table.records.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ExecutionRecord>> {
        let table = self.table.lock().await;
        Ok(table.records.get(&id).cloned())
    }

    async fn list(&self, filter: &ExecutionFilter) -> SchedulerResult<Vec<ExecutionRecord>> {
        let table = self.table.lock().await;
        let mut records: Vec<ExecutionRecord> = table
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(newest_first);

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let records = records.into_iter().skip(offset);
        Ok(match filter.limit {
            Some(limit) if limit >= 0 => records.take(limit as usize).collect(),
            _ => records.collect(),
        })
    }

    async fn count(&self, filter: &ExecutionFilter) -> SchedulerResult<i64> {
        let table = self.table.lock().await;
        Ok(table.records.values().filter(|r| filter.matches(r)).count() as i64)
    }

    async fn find_latest_running(
        &self,
        job_id: &str,
        started_after: DateTime<Utc>,
    ) -> SchedulerResult<Option<ExecutionRecord>> {
        let table = self.table.lock().await;
        Ok(table
            .records
            .values()
            .filter(|r| r.job_id == job_id && r.is_running() && r.start_timestamp >= started_after)
            .min_by(|a, b| newest_first(a, b))
            .cloned())
    }

    async fn find_stale_running(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionRecord>> {
        let table = self.table.lock().await;
        let mut stale: Vec<ExecutionRecord> = table
            .records
            .values()
            .filter(|r| r.is_running() && r.start_timestamp < started_before)
            .cloned()
            .collect();
        stale.sort_by(|a, b| {
            a.start_timestamp
                .cmp(&b.start_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn complete_if_running(
        &self,
        id: i64,
        completion: &ExecutionCompletion,
    ) -> SchedulerResult<bool> {
        let mut table = self.table.lock().await;
        match table.records.get_mut(&id) {
            Some(record) if record.is_running() => {
                completion.apply_to(record);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_progress(
        &self,
        id: i64,
        update: &ProgressUpdate,
    ) -> SchedulerResult<Option<ProgressAck>> {
        let mut table = self.table.lock().await;
        let Some(record) = table.records.get_mut(&id) else {
            return Ok(None);
        };

        if !record.is_running() {
            return Ok(Some(ProgressAck {
                still_running: false,
                cancel_requested: record.cancel_requested,
            }));
        }

        record.progress = Some(update.progress.min(100));
        if update.message.is_some() {
            record.progress_message = update.message.clone();
        }
        if update.current_item.is_some() {
            record.current_item = update.current_item.clone();
        }
        if update.total_items.is_some() {
            record.total_items = update.total_items;
        }
        if update.processed_items.is_some() {
            record.processed_items = update.processed_items;
        }
        record.updated_at = Utc::now();

        Ok(Some(ProgressAck {
            still_running: true,
            cancel_requested: record.cancel_requested,
        }))
    }

    async fn request_cancel(&self, id: i64) -> SchedulerResult<bool> {
        let mut table = self.table.lock().await;
        match table.records.get_mut(&id) {
            Some(record) if record.is_running() => {
                record.cancel_requested = true;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_terminal(&self, id: i64) -> SchedulerResult<bool> {
        let mut table = self.table.lock().await;
        match table.records.get(&id) {
            Some(record) if record.status.is_terminal() => {
                table.records.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn job_stats(&self, job_id: &str) -> SchedulerResult<JobExecutionStats> {
        let table = self.table.lock().await;
        let records: Vec<&ExecutionRecord> = table
            .records
            .values()
            .filter(|r| r.job_id == job_id)
            .collect();

        let mut summary = ExecutionStatusSummary::default();
        for record in &records {
            summary.add(record.status, 1);
        }

        let durations: Vec<f64> = records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .filter_map(|r| r.execution_time)
            .collect();
        let avg_execution_time = if durations.is_empty() {
            None
        } else {
            Some(durations.iter().sum::<f64>() / durations.len() as f64)
        };

        let last_execution = records
            .iter()
            .min_by(|a, b| newest_first(a, b))
            .map(|r| LastExecution {
                id: r.id,
                status: r.status,
                start_timestamp: r.start_timestamp,
                execution_time: r.execution_time,
            });

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
        let table = self.table.lock().await;
        let mut summary = ExecutionStatusSummary::default();
        for record in table.records.values() {
            summary.add(record.status, 1);
        }
        Ok(summary)
    }
}

/// 内存操作日志
#[derive(Clone, Default)]
pub struct InMemoryJobActionLogRepository {
    entries: Arc<Mutex<Vec<JobActionLog>>>,
}

impl InMemoryJobActionLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobActionLogRepository for InMemoryJobActionLogRepository {
    async fn append(&self, entry: &JobActionLog) -> SchedulerResult<JobActionLog> {
        let mut entries = self.entries.lock().await;
        let mut stored = entry.clone();
        stored.id = entries.len() as i64 + 1;
        entries.push(stored.clone());
        Ok(stored)
    }

    async fn list(
        &self,
        job_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> SchedulerResult<Vec<JobActionLog>> {
        let entries = self.entries.lock().await;
        let mut matched: Vec<JobActionLog> = entries
            .iter()
            .filter(|e| job_id.map_or(true, |id| e.job_id == id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, job_id: Option<&str>) -> SchedulerResult<i64> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| job_id.map_or(true, |id| e.job_id == id))
            .count() as i64)
    }
}

/// 内存任务元数据
#[derive(Clone, Default)]
pub struct InMemoryJobMetadataRepository {
    entries: Arc<Mutex<HashMap<String, JobMetadata>>>,
}

impl InMemoryJobMetadataRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobMetadataRepository for InMemoryJobMetadataRepository {
    async fn get(&self, job_id: &str) -> SchedulerResult<Option<JobMetadata>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(job_id).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<JobMetadata>> {
        let entries = self.entries.lock().await;
        let mut all: Vec<JobMetadata> = entries.values().cloned().collect();
        all.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(all)
    }

    async fn upsert(&self, metadata: &JobMetadata) -> SchedulerResult<JobMetadata> {
        let mut entries = self.entries.lock().await;
        let merged = match entries.get(&metadata.job_id) {
            Some(existing) => JobMetadata {
                job_id: metadata.job_id.clone(),
                display_name: metadata
                    .display_name
                    .clone()
                    .or_else(|| existing.display_name.clone()),
                description: metadata
                    .description
                    .clone()
                    .or_else(|| existing.description.clone()),
                updated_at: metadata.updated_at,
            },
            None => metadata.clone(),
        };
        entries.insert(merged.job_id.clone(), merged.clone());
        Ok(merged)
    }
}
