//! 控制面
//!
//! 面向操作员的同步接口。所有会改变状态的操作无论成败都写入任务操作日志；
//! 调用错误（未知ID、对非运行记录取消、删除运行中记录等）同步返回，不做任何修改。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use ingest_scheduler_core::{
    models::{
        ActionStatus, ExecutionCompletion, ExecutionFilter, ExecutionRecord,
        ExecutionStatusSummary, JobAction, JobActionLog, JobExecutionStats, JobKwargs,
        JobMetadata, JobView, MetadataUpdate,
    },
    SchedulerError, SchedulerResult,
};
use ingest_scheduler_infrastructure::{MetricsCollector, Storage, StructuredLogger};

use crate::coordinator::ExecutionCoordinator;
use crate::registry::JobRegistry;

/// 调度器运行统计
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub instance_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub jobs_total: usize,
    pub jobs_paused: usize,
    pub running_instances: u32,
    pub in_flight: usize,
    /// 账本不可用时为空
    pub executions: Option<ExecutionStatusSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub storage_backend: &'static str,
    pub storage_healthy: bool,
    pub storage_error: Option<String>,
    pub uptime_seconds: i64,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.storage_healthy
    }
}

/// 调度实例的标识
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

pub struct ControlPlane {
    registry: Arc<JobRegistry>,
    coordinator: Arc<ExecutionCoordinator>,
    storage: Storage,
    metrics: Arc<MetricsCollector>,
    instance: InstanceInfo,
}

impl ControlPlane {
    pub fn new(
        coordinator: Arc<ExecutionCoordinator>,
        storage: Storage,
        metrics: Arc<MetricsCollector>,
        instance: InstanceInfo,
    ) -> Self {
        Self {
            registry: coordinator.registry().clone(),
            coordinator,
            storage,
            metrics,
            instance,
        }
    }

    pub async fn list_jobs(&self) -> Vec<JobView> {
        self.registry.list().await
    }

    pub async fn get_job(&self, job_id: &str) -> SchedulerResult<JobView> {
        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| SchedulerError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    pub async fn pause_job(&self, job_id: &str) -> SchedulerResult<JobView> {
        let result = self.registry.set_paused(job_id, true).await;
        self.log_action(job_id, None, JobAction::Pause, result.as_ref().err())
            .await;
        result
    }

    pub async fn resume_job(&self, job_id: &str) -> SchedulerResult<JobView> {
        let result = self.registry.set_paused(job_id, false).await;
        self.log_action(job_id, None, JobAction::Resume, result.as_ref().err())
            .await;
        result
    }

    /// 手动触发，不受暂停状态和触发计划影响
    ///
    /// `kwargs` 覆盖同名默认参数，仅对本次调用生效。返回时运行记录已经写入账本。
    pub async fn trigger_job(
        &self,
        job_id: &str,
        kwargs: Option<JobKwargs>,
    ) -> SchedulerResult<ExecutionRecord> {
        let result = self
            .coordinator
            .trigger_manual(job_id, kwargs.as_ref())
            .await;
        let execution_id = result.as_ref().ok().map(|r| r.id);
        self.log_action(
            job_id,
            execution_id,
            JobAction::Trigger,
            result.as_ref().err(),
        )
        .await;
        result
    }

    /// 修改展示名称和备注并持久化，重启后覆盖静态配置
    pub async fn update_job_metadata(
        &self,
        job_id: &str,
        update: MetadataUpdate,
    ) -> SchedulerResult<JobView> {
        let result = self.apply_metadata_update(job_id, &update).await;
        self.log_action(
            job_id,
            None,
            JobAction::UpdateMetadata,
            result.as_ref().err(),
        )
        .await;
        result
    }

    async fn apply_metadata_update(
        &self,
        job_id: &str,
        update: &MetadataUpdate,
    ) -> SchedulerResult<JobView> {
        // 先确认任务存在，未知任务不写入元数据表
        self.get_job(job_id).await?;
        self.storage
            .metadata
            .upsert(&JobMetadata {
                job_id: job_id.to_string(),
                display_name: update.display_name.clone(),
                description: update.description.clone(),
                updated_at: Utc::now(),
            })
            .await?;
        self.registry.update_metadata(job_id, update).await
    }

    /// 请求取消运行中的执行，处理器在下一次上报进度时收到取消信号
    pub async fn cancel_execution(&self, execution_id: i64) -> SchedulerResult<ExecutionRecord> {
        let (job_id, result) = match self.running_record(execution_id).await {
            Ok(record) => {
                let job_id = record.job_id.clone();
                (job_id, self.request_cancel(record).await)
            }
            Err((job_id, e)) => (job_id, Err(e)),
        };
        self.log_action(
            &job_id,
            Some(execution_id),
            JobAction::CancelExecution,
            result.as_ref().err(),
        )
        .await;
        result
    }

    async fn request_cancel(&self, mut record: ExecutionRecord) -> SchedulerResult<ExecutionRecord> {
        if !self.storage.executions.request_cancel(record.id).await? {
            return Err(self.not_running_error(record.id).await);
        }
        self.metrics.record_cancel_request();
        record.cancel_requested = true;
        Ok(record)
    }

    /// 操作员强制把运行中的执行标记为失败
    pub async fn mark_execution_failed(
        &self,
        execution_id: i64,
        reason: &str,
    ) -> SchedulerResult<ExecutionRecord> {
        let (job_id, result) = match self.running_record(execution_id).await {
            Ok(record) => {
                let job_id = record.job_id.clone();
                (job_id, self.force_fail(record, reason).await)
            }
            Err((job_id, e)) => (job_id, Err(e)),
        };
        self.log_action(
            &job_id,
            Some(execution_id),
            JobAction::MarkFailed,
            result.as_ref().err(),
        )
        .await;
        result
    }

    async fn force_fail(
        &self,
        mut record: ExecutionRecord,
        reason: &str,
    ) -> SchedulerResult<ExecutionRecord> {
        let now = Utc::now();
        let completion =
            ExecutionCompletion::failed(now, record.elapsed_seconds(now), reason, None);
        if !self
            .storage
            .executions
            .complete_if_running(record.id, &completion)
            .await?
        {
            return Err(self.not_running_error(record.id).await);
        }
        completion.apply_to(&mut record);
        Ok(record)
    }

    /// 删除终态执行记录，运行中的记录不能删除
    pub async fn delete_execution(&self, execution_id: i64) -> SchedulerResult<()> {
        let (job_id, result) = match self.storage.executions.get_by_id(execution_id).await {
            Ok(Some(record)) if record.is_running() => (
                record.job_id,
                Err(SchedulerError::ExecutionStillRunning { id: execution_id }),
            ),
            Ok(Some(record)) => {
                let result = match self.storage.executions.delete_if_terminal(execution_id).await
                {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(SchedulerError::ExecutionNotFound { id: execution_id }),
                    Err(e) => Err(e),
                };
                (record.job_id, result)
            }
            Ok(None) => (
                String::new(),
                Err(SchedulerError::ExecutionNotFound { id: execution_id }),
            ),
            Err(e) => (String::new(), Err(e)),
        };
        self.log_action(
            &job_id,
            Some(execution_id),
            JobAction::DeleteExecution,
            result.as_ref().err(),
        )
        .await;
        result
    }

    pub async fn get_execution(&self, execution_id: i64) -> SchedulerResult<ExecutionRecord> {
        self.storage
            .executions
            .get_by_id(execution_id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id: execution_id })
    }

    /// 按条件查询执行记录，按开始时间倒序
    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> SchedulerResult<Vec<ExecutionRecord>> {
        self.storage.executions.list(filter).await
    }

    pub async fn count_executions(&self, filter: &ExecutionFilter) -> SchedulerResult<i64> {
        self.storage.executions.count(filter).await
    }

    pub async fn job_execution_stats(&self, job_id: &str) -> SchedulerResult<JobExecutionStats> {
        self.storage.executions.job_stats(job_id).await
    }

    /// 任务操作历史，`job_id` 为空时返回全部
    pub async fn job_action_history(
        &self,
        job_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> SchedulerResult<Vec<JobActionLog>> {
        self.storage.action_logs.list(job_id, limit, offset).await
    }

    pub async fn job_action_history_count(&self, job_id: Option<&str>) -> SchedulerResult<i64> {
        self.storage.action_logs.count(job_id).await
    }

    /// 进程存活时总能返回，账本查询失败只影响执行汇总字段
    pub async fn get_stats(&self) -> SchedulerStats {
        let jobs = self.registry.list().await;
        let executions = match self.storage.executions.status_summary().await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("获取执行汇总失败: {}", e);
                None
            }
        };
        let now = Utc::now();
        SchedulerStats {
            instance_id: self.instance.instance_id.clone(),
            hostname: self.instance.hostname.clone(),
            started_at: self.instance.started_at,
            uptime_seconds: (now - self.instance.started_at).num_seconds(),
            jobs_total: jobs.len(),
            jobs_paused: jobs.iter().filter(|j| j.paused).count(),
            running_instances: jobs.iter().map(|j| j.running_instances).sum(),
            in_flight: self.coordinator.in_flight(),
            executions,
        }
    }

    pub async fn health(&self) -> HealthStatus {
        let now = Utc::now();
        let storage_error = self.storage.health_check().await.err().map(|e| e.to_string());
        HealthStatus {
            status: if storage_error.is_none() { "ok" } else { "degraded" },
            storage_backend: self.storage.backend(),
            storage_healthy: storage_error.is_none(),
            storage_error,
            uptime_seconds: (now - self.instance.started_at).num_seconds(),
            checked_at: now,
        }
    }

    /// 取出运行中的记录，失败时附带用于写日志的任务ID
    async fn running_record(
        &self,
        execution_id: i64,
    ) -> Result<ExecutionRecord, (String, SchedulerError)> {
        match self.storage.executions.get_by_id(execution_id).await {
            Ok(Some(record)) if record.is_running() => Ok(record),
            Ok(Some(record)) => Err((
                record.job_id,
                SchedulerError::ExecutionNotRunning {
                    id: execution_id,
                    status: record.status.to_string(),
                },
            )),
            Ok(None) => Err((
                String::new(),
                SchedulerError::ExecutionNotFound { id: execution_id },
            )),
            Err(e) => Err((String::new(), e)),
        }
    }

    /// 条件更新落空时重新读取当前状态
    async fn not_running_error(&self, execution_id: i64) -> SchedulerError {
        match self.storage.executions.get_by_id(execution_id).await {
            Ok(Some(record)) => SchedulerError::ExecutionNotRunning {
                id: execution_id,
                status: record.status.to_string(),
            },
            Ok(None) => SchedulerError::ExecutionNotFound { id: execution_id },
            Err(e) => e,
        }
    }

    async fn log_action(
        &self,
        job_id: &str,
        execution_id: Option<i64>,
        action: JobAction,
        error: Option<&SchedulerError>,
    ) {
        let status = if error.is_none() {
            ActionStatus::Success
        } else {
            ActionStatus::Failed
        };
        let message = error.map(|e| e.to_string());
        StructuredLogger::log_job_action(job_id, action, status, execution_id, message.as_deref());

        let mut entry = JobActionLog::new(job_id, action, status).with_message(message);
        if let Some(id) = execution_id {
            entry = entry.with_execution(id);
        }
        if let Err(e) = self.storage.action_logs.append(&entry).await {
            warn!("写入任务操作日志失败 ({} {}): {}", job_id, action, e);
        }
    }
}
