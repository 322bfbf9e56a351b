//! Structured logging utilities
//!
//! 调度事件以固定的 `event` 字段输出，JSON格式下可以直接按事件类型检索。

use chrono::{DateTime, Utc};
use ingest_scheduler_core::models::{ActionStatus, ExecutionRecord, ExecutionStatus, JobAction};
use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    /// 任务注册完成
    pub fn log_job_registered(
        job_id: &str,
        trigger: &str,
        paused: bool,
        next_fire_time: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "job_registered",
            job.id = job_id,
            job.trigger = trigger,
            job.paused = paused,
            job.next_fire_time = ?next_fire_time,
            "任务已注册"
        );
    }

    /// 执行记录已创建，处理器即将开始
    pub fn log_execution_started(record: &ExecutionRecord) {
        info!(
            event = "execution_started",
            execution.id = record.id,
            job.id = %record.job_id,
            execution.is_manual = record.is_manual,
            execution.scheduled_time = %record.scheduled_time,
            "任务开始执行"
        );
    }

    /// 执行进入终态
    pub fn log_execution_completed(
        execution_id: i64,
        job_id: &str,
        status: ExecutionStatus,
        execution_time: f64,
        error_message: Option<&str>,
    ) {
        match status {
            ExecutionStatus::Success => info!(
                event = "execution_completed",
                execution.id = execution_id,
                job.id = job_id,
                execution.status = %status,
                execution.time_seconds = execution_time,
                "任务执行成功"
            ),
            _ => error!(
                event = "execution_failed",
                execution.id = execution_id,
                job.id = job_id,
                execution.status = %status,
                execution.time_seconds = execution_time,
                execution.error = error_message.unwrap_or("未知错误"),
                "任务执行失败"
            ),
        }
    }

    /// 完成回调到达时记录已经是终态
    pub fn log_late_completion(execution_id: i64, job_id: &str, current: ExecutionStatus) {
        warn!(
            event = "late_completion_dropped",
            execution.id = execution_id,
            job.id = job_id,
            execution.current_status = %current,
            "执行记录已处于终态，忽略迟到的完成结果"
        );
    }

    /// 超过宽限期的触发
    pub fn log_execution_missed(job_id: &str, scheduled_time: DateTime<Utc>, late_seconds: i64) {
        warn!(
            event = "execution_missed",
            job.id = job_id,
            execution.scheduled_time = %scheduled_time,
            execution.late_seconds = late_seconds,
            "任务错过执行时间"
        );
    }

    /// 达到最大并发实例数，本次触发被跳过
    pub fn log_execution_skipped(job_id: &str, max_instances: u32) {
        debug!(
            event = "execution_skipped",
            job.id = job_id,
            job.max_instances = max_instances,
            "任务仍在运行，跳过本次触发"
        );
    }

    /// 僵尸执行被回收
    pub fn log_zombie_reaped(execution_id: i64, job_id: &str, elapsed_seconds: f64) {
        warn!(
            event = "zombie_reaped",
            execution.id = execution_id,
            job.id = job_id,
            execution.elapsed_seconds = elapsed_seconds,
            "僵尸执行已标记为失败"
        );
    }

    /// 控制操作
    pub fn log_job_action(
        job_id: &str,
        action: JobAction,
        status: ActionStatus,
        execution_id: Option<i64>,
        error_message: Option<&str>,
    ) {
        match status {
            ActionStatus::Success => info!(
                event = "job_action",
                job.id = job_id,
                action = %action,
                action.status = status.as_str(),
                execution.id = ?execution_id,
                "控制操作成功"
            ),
            ActionStatus::Failed => warn!(
                event = "job_action",
                job.id = job_id,
                action = %action,
                action.status = status.as_str(),
                execution.id = ?execution_id,
                action.error = error_message.unwrap_or(""),
                "控制操作失败"
            ),
        }
    }
}
