use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 操作员对任务或执行记录的控制操作
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Pause,
    Resume,
    Trigger,
    UpdateMetadata,
    CancelExecution,
    MarkFailed,
    DeleteExecution,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Pause => "pause",
            JobAction::Resume => "resume",
            JobAction::Trigger => "trigger",
            JobAction::UpdateMetadata => "update_metadata",
            JobAction::CancelExecution => "cancel_execution",
            JobAction::MarkFailed => "mark_failed",
            JobAction::DeleteExecution => "delete_execution",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pause" => JobAction::Pause,
            "resume" => JobAction::Resume,
            "trigger" => JobAction::Trigger,
            "update_metadata" => JobAction::UpdateMetadata,
            "cancel_execution" => JobAction::CancelExecution,
            "mark_failed" => JobAction::MarkFailed,
            "delete_execution" => JobAction::DeleteExecution,
            _ => return None,
        })
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ActionStatus::Success),
            "failed" => Some(ActionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 控制操作审计日志（只追加）
///
/// 执行记录级别的操作在找不到对应记录时 `job_id` 为空字符串，
/// 此时通过 `execution_id` 定位。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobActionLog {
    pub id: i64,
    pub job_id: String,
    pub execution_id: Option<i64>,
    pub action: JobAction,
    pub status: ActionStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobActionLog {
    pub fn new(job_id: impl Into<String>, action: JobAction, status: ActionStatus) -> Self {
        Self {
            id: 0,
            job_id: job_id.into(),
            execution_id: None,
            action,
            status,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_execution(mut self, execution_id: i64) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }
}
