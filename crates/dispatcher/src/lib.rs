//! 调度与执行追踪
//!
//! - [`trigger`] / [`cron_utils`] - 触发时间计算
//! - [`registry`] - 任务注册表
//! - [`coordinator`] - 执行协调与结果对账
//! - [`reaper`] - 僵尸执行回收
//! - [`controller`] - 面向操作员的控制面
//! - [`context`] - 组装以上组件的调度上下文

pub mod context;
pub mod controller;
pub mod coordinator;
pub mod cron_utils;
pub mod reaper;
pub mod registry;
pub mod trigger;

pub use context::SchedulerContext;
pub use controller::{ControlPlane, HealthStatus, InstanceInfo, SchedulerStats};
pub use coordinator::{
    ExecutionCoordinator, ExecutionOutcome, FinalizeMessage, Reconciliation, TickReport,
};
pub use cron_utils::CronScheduler;
pub use reaper::ZombieReaper;
pub use registry::{DueFire, FireTicket, JobRegistry};
pub use trigger::JobTrigger;
