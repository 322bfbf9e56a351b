use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 被操作员取消的执行记录使用的错误信息标记
pub const CANCELLED_ERROR_MESSAGE: &str = "cancelled by operator";

/// 僵尸执行被回收时写入的错误信息
pub const ZOMBIE_ERROR_MESSAGE: &str = "stale/zombie execution";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Missed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Missed => "missed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            "missed" => Ok(ExecutionStatus::Missed),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ExecutionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse::<ExecutionStatus>()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 一次任务执行尝试的记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_id: String,
    pub job_name: String,
    pub status: ExecutionStatus,
    pub scheduled_time: DateTime<Utc>,
    pub start_timestamp: DateTime<Utc>,
    /// 执行耗时（秒），仅在终态时设置
    pub execution_time: Option<f64>,
    pub progress: Option<u8>,
    pub progress_message: Option<String>,
    pub current_item: Option<String>,
    pub total_items: Option<i64>,
    pub processed_items: Option<i64>,
    pub is_manual: bool,
    pub cancel_requested: bool,
    pub return_value: Option<String>,
    pub error_message: Option<String>,
    pub traceback: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// 创建运行中的执行记录
    pub fn running(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        is_manual: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储层生成
            job_id: job_id.into(),
            job_name: job_name.into(),
            status: ExecutionStatus::Running,
            scheduled_time,
            start_timestamp: now,
            execution_time: None,
            progress: Some(0),
            progress_message: None,
            current_item: None,
            total_items: None,
            processed_items: None,
            is_manual,
            cancel_requested: false,
            return_value: None,
            error_message: None,
            traceback: None,
            updated_at: now,
        }
    }

    /// 创建错过执行的记录，不经过运行状态
    pub fn missed(
        job_id: impl Into<String>,
        job_name: impl Into<String>,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        let mut record = Self::running(job_id, job_name, scheduled_time, false);
        record.status = ExecutionStatus::Missed;
        record.progress = None;
        record
    }

    pub fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ExecutionStatus::Failed
            && self.error_message.as_deref() == Some(CANCELLED_ERROR_MESSAGE)
    }

    /// 从开始时间到给定时刻经过的秒数
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let elapsed = (now - self.start_timestamp).num_milliseconds() as f64 / 1000.0;
        elapsed.max(0.0)
    }

    pub fn entity_description(&self) -> String {
        format!("执行记录 {} (任务: {})", self.id, self.job_id)
    }
}

/// 执行记录进入终态时写入的字段
#[derive(Debug, Clone)]
pub struct ExecutionCompletion {
    pub status: ExecutionStatus,
    pub finished_at: DateTime<Utc>,
    pub execution_time: f64,
    pub return_value: Option<String>,
    pub error_message: Option<String>,
    pub traceback: Option<String>,
    pub progress: Option<u8>,
}

impl ExecutionCompletion {
    pub fn success(finished_at: DateTime<Utc>, execution_time: f64, return_value: Option<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            finished_at,
            execution_time,
            return_value,
            error_message: None,
            traceback: None,
            progress: Some(100),
        }
    }

    pub fn failed(
        finished_at: DateTime<Utc>,
        execution_time: f64,
        error_message: impl Into<String>,
        traceback: Option<String>,
    ) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            finished_at,
            execution_time,
            return_value: None,
            error_message: Some(error_message.into()),
            traceback,
            progress: None,
        }
    }

    /// 将完成信息应用到记录上（内存实现和新建终态记录时使用）
    pub fn apply_to(&self, record: &mut ExecutionRecord) {
        record.status = self.status;
        record.execution_time = Some(self.execution_time);
        record.updated_at = self.finished_at;
        if self.return_value.is_some() {
            record.return_value = self.return_value.clone();
        }
        if self.error_message.is_some() {
            record.error_message = self.error_message.clone();
        }
        if self.traceback.is_some() {
            record.traceback = self.traceback.clone();
        }
        if self.progress.is_some() {
            record.progress = self.progress;
        }
    }
}

/// 处理器上报的进度
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub progress: u8,
    pub message: Option<String>,
    pub current_item: Option<String>,
    pub total_items: Option<i64>,
    pub processed_items: Option<i64>,
}

impl ProgressUpdate {
    pub fn percent(progress: u8) -> Self {
        Self {
            progress: progress.min(100),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_items(mut self, processed: i64, total: i64) -> Self {
        self.processed_items = Some(processed);
        self.total_items = Some(total);
        self
    }

    pub fn with_current_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }
}

/// 进度写入后的回执
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressAck {
    /// 记录是否仍处于运行状态（非运行状态下进度不会写入）
    pub still_running: bool,
    pub cancel_requested: bool,
}

/// 执行记录查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub job_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub is_manual: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ExecutionFilter {
    pub fn for_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn manual(mut self, is_manual: bool) -> Self {
        self.is_manual = Some(is_manual);
        self
    }

    pub fn paginate(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        self.job_id.as_ref().map_or(true, |id| &record.job_id == id)
            && self.status.map_or(true, |s| record.status == s)
            && self.is_manual.map_or(true, |m| record.is_manual == m)
    }
}

/// 单个任务的执行统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobExecutionStats {
    pub job_id: String,
    pub total: i64,
    pub running: i64,
    pub success: i64,
    pub failed: i64,
    pub missed: i64,
    /// 成功执行的平均耗时（秒）
    pub avg_execution_time: Option<f64>,
    pub last_execution: Option<LastExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastExecution {
    pub id: i64,
    pub status: ExecutionStatus,
    pub start_timestamp: DateTime<Utc>,
    pub execution_time: Option<f64>,
}

/// 全部执行记录按状态汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionStatusSummary {
    pub running: i64,
    pub success: i64,
    pub failed: i64,
    pub missed: i64,
}

impl ExecutionStatusSummary {
    pub fn total(&self) -> i64 {
        self.running + self.success + self.failed + self.missed
    }

    pub fn add(&mut self, status: ExecutionStatus, count: i64) {
        match status {
            ExecutionStatus::Running => self.running += count,
            ExecutionStatus::Success => self.success += count,
            ExecutionStatus::Failed => self.failed += count,
            ExecutionStatus::Missed => self.missed += count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_running_record_defaults() {
        let scheduled = Utc::now();
        let record = ExecutionRecord::running("news_sync", "新闻同步", scheduled, true);
        assert!(record.is_running());
        assert!(record.is_manual);
        assert!(!record.cancel_requested);
        assert_eq!(record.progress, Some(0));
        assert!(record.execution_time.is_none());
    }

    #[test]
    fn test_missed_record_is_terminal() {
        let record = ExecutionRecord::missed("news_sync", "新闻同步", Utc::now());
        assert_eq!(record.status, ExecutionStatus::Missed);
        assert!(record.status.is_terminal());
        assert!(record.progress.is_none());
    }

    #[test]
    fn test_completion_apply_keeps_progress_fields() {
        let mut record = ExecutionRecord::running("a", "a", Utc::now(), false);
        record.progress = Some(40);
        record.progress_message = Some("处理中".into());

        let now = record.start_timestamp + Duration::seconds(3);
        ExecutionCompletion::failed(now, 3.0, CANCELLED_ERROR_MESSAGE, None).apply_to(&mut record);

        assert!(record.is_cancelled());
        assert_eq!(record.progress, Some(40));
        assert_eq!(record.progress_message.as_deref(), Some("处理中"));
        assert_eq!(record.execution_time, Some(3.0));
    }

    #[test]
    fn test_filter_matches() {
        let record = ExecutionRecord::running("a", "a", Utc::now(), true);
        assert!(ExecutionFilter::default().matches(&record));
        assert!(ExecutionFilter::for_job("a").manual(true).matches(&record));
        assert!(!ExecutionFilter::for_job("b").matches(&record));
        assert!(!ExecutionFilter::default()
            .with_status(ExecutionStatus::Success)
            .matches(&record));
        assert!(!ExecutionFilter::default().manual(false).matches(&record));
    }

    #[test]
    fn test_status_round_trip_from_str() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Success,
            ExecutionStatus::Failed,
            ExecutionStatus::Missed,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_elapsed_seconds_never_negative() {
        let record = ExecutionRecord::running("a", "a", Utc::now(), false);
        let before = record.start_timestamp - Duration::seconds(10);
        assert_eq!(record.elapsed_seconds(before), 0.0);
        let after = record.start_timestamp + Duration::milliseconds(2500);
        assert!((record.elapsed_seconds(after) - 2.5).abs() < 1e-9);
    }
}
