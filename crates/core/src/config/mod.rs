//! 配置管理
//!
//! [`AppConfig`] 按 默认值 → TOML文件 → 环境变量 的顺序合并，加载后逐段验证。
//!
//! ```toml
//! [database]
//! url = "sqlite:ingest_scheduler.db?mode=rwc"
//!
//! [scheduler]
//! misfire_grace_seconds = 30
//!
//! [[jobs]]
//! id = "news_sync"
//! display_name = "新闻同步"
//! handler = "batch"
//! timezone = "Asia/Shanghai"
//! trigger = { type = "cron", expression = "*/30 * * * *" }
//! ```

pub mod models;

pub use models::*;
