//! 数据仓储层接口定义
//!
//! - [`ExecutionRepository`] - 执行账本，支持过滤查询和终态对账
//! - [`JobActionLogRepository`] - 控制操作审计日志（只追加）
//! - [`JobMetadataRepository`] - 操作员修改的任务元数据
//!
//! ## 条件更新
//!
//! 所有让执行记录离开 `running` 的写操作都是条件更新：只有当记录仍处于
//! `running` 时才会生效，并返回是否生效。协调器完成回调、僵尸回收和人工标记
//! 可以以任意顺序并发执行，已经进入终态的记录不会被覆盖。

use crate::models::{
    ExecutionCompletion, ExecutionFilter, ExecutionRecord, ExecutionStatusSummary,
    JobActionLog, JobExecutionStats, JobMetadata, ProgressAck, ProgressUpdate,
};
use crate::SchedulerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 执行账本仓储接口
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// 插入新记录并返回带生成ID的记录
    async fn create(&self, record: &ExecutionRecord) -> SchedulerResult<ExecutionRecord>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<ExecutionRecord>>;

    /// 按条件查询，按开始时间倒序
    async fn list(&self, filter: &ExecutionFilter) -> SchedulerResult<Vec<ExecutionRecord>>;

    /// 按条件计数（忽略分页参数）
    async fn count(&self, filter: &ExecutionFilter) -> SchedulerResult<i64>;

    /// 查找某任务在给定时间之后开始的最近一条运行中记录
    async fn find_latest_running(
        &self,
        job_id: &str,
        started_after: DateTime<Utc>,
    ) -> SchedulerResult<Option<ExecutionRecord>>;

    /// 查找开始时间早于给定时刻、仍处于运行状态的记录，按开始时间升序
    async fn find_stale_running(
        &self,
        started_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ExecutionRecord>>;

    /// 仅当记录仍处于运行状态时写入终态，返回是否生效
    async fn complete_if_running(
        &self,
        id: i64,
        completion: &ExecutionCompletion,
    ) -> SchedulerResult<bool>;

    /// 写入进度并返回取消标记；记录不存在时返回 `None`
    async fn record_progress(
        &self,
        id: i64,
        update: &ProgressUpdate,
    ) -> SchedulerResult<Option<ProgressAck>>;

    /// 仅当记录仍处于运行状态时设置取消标记，返回是否生效
    async fn request_cancel(&self, id: i64) -> SchedulerResult<bool>;

    /// 仅当记录处于终态时删除，返回是否生效
    async fn delete_if_terminal(&self, id: i64) -> SchedulerResult<bool>;

    async fn job_stats(&self, job_id: &str) -> SchedulerResult<JobExecutionStats>;

    async fn status_summary(&self) -> SchedulerResult<ExecutionStatusSummary>;
}

/// 控制操作审计日志仓储接口
#[async_trait]
pub trait JobActionLogRepository: Send + Sync {
    async fn append(&self, entry: &JobActionLog) -> SchedulerResult<JobActionLog>;

    /// 按时间倒序查询，`job_id` 为空时返回全部任务的操作记录
    async fn list(
        &self,
        job_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> SchedulerResult<Vec<JobActionLog>>;

    async fn count(&self, job_id: Option<&str>) -> SchedulerResult<i64>;
}

/// 任务元数据仓储接口
#[async_trait]
pub trait JobMetadataRepository: Send + Sync {
    async fn get(&self, job_id: &str) -> SchedulerResult<Option<JobMetadata>>;

    async fn list(&self) -> SchedulerResult<Vec<JobMetadata>>;

    /// 插入或更新，字段为空时保留已有值
    async fn upsert(&self, metadata: &JobMetadata) -> SchedulerResult<JobMetadata>;
}
