//! # 数据模型
//!
//! 调度核心的数据结构：
//!
//! - [`JobDefinition`] - 可调度的任务定义，启动时从静态配置注册
//! - [`ExecutionRecord`] - 一次执行尝试的账本记录
//! - [`JobActionLog`] - 暂停/恢复/触发等控制操作的审计日志
//! - [`JobMetadata`] - 操作员修改过的任务名称与备注
//!
//! ## 执行状态流转
//!
//! ```text
//! scheduled → running → success
//!                ↓
//!              failed (含取消、僵尸回收、人工标记)
//! scheduled → missed (超过宽限期，不经过running)
//! ```
//!
//! 所有时间字段使用 `DateTime<Utc>` 存储，任务所在时区只用于计算触发时间和展示。

pub mod action_log;
pub mod execution;
pub mod job;

pub use action_log::*;
pub use execution::*;
pub use job::*;
