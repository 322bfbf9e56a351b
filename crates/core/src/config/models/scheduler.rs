use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 时长类配置的上限（天）
pub const MAX_DURATION_DAYS: i64 = 36_500;

/// 时长类配置的上限（秒）
pub const MAX_DURATION_SECONDS: u64 = MAX_DURATION_DAYS as u64 * 86_400;

/// 秒数转换为 `chrono::Duration`，超过 [`MAX_DURATION_SECONDS`] 时返回 `None`
pub fn checked_duration(seconds: u64) -> Option<chrono::Duration> {
    if seconds > MAX_DURATION_SECONDS {
        return None;
    }
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
}

/// 秒数转换为 `chrono::Duration`，超出上限时截断为上限
pub fn bounded_duration(seconds: u64) -> chrono::Duration {
    checked_duration(seconds).unwrap_or_else(|| chrono::Duration::days(MAX_DURATION_DAYS))
}

fn ensure_within_bound(name: &str, seconds: u64) -> anyhow::Result<()> {
    if seconds > MAX_DURATION_SECONDS {
        return Err(anyhow::anyhow!(
            "{name}不能超过{MAX_DURATION_SECONDS}秒: {seconds}"
        ));
    }
    Ok(())
}

/// 调度循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 调度循环检查到期任务的间隔（毫秒）
    pub tick_interval_ms: u64,
    /// 全局错过执行宽限期，超过后记录为 missed
    pub misfire_grace_seconds: u64,
    /// 找不到原始记录时，对账可以匹配的运行中记录的最大年龄
    pub reconciliation_window_seconds: u64,
    pub default_timezone: String,
    /// 手动触发暂停中的任务时同时恢复该任务
    pub resume_paused_on_trigger: bool,
    /// 关闭时等待运行中任务完成的最长时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            misfire_grace_seconds: 30,
            reconciliation_window_seconds: 300,
            default_timezone: "UTC".to_string(),
            resume_paused_on_trigger: false,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn misfire_grace(&self) -> chrono::Duration {
        bounded_duration(self.misfire_grace_seconds)
    }

    pub fn reconciliation_window(&self) -> chrono::Duration {
        bounded_duration(self.reconciliation_window_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.tick_interval_ms > 60_000 {
            return Err(anyhow::anyhow!("调度间隔不能超过60秒"));
        }

        if self.reconciliation_window_seconds == 0 {
            return Err(anyhow::anyhow!("对账时间窗口必须大于0"));
        }

        ensure_within_bound("错过执行宽限期", self.misfire_grace_seconds)?;
        ensure_within_bound("对账时间窗口", self.reconciliation_window_seconds)?;
        ensure_within_bound("关闭等待时间", self.shutdown_timeout_seconds)?;

        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(anyhow::anyhow!(
                "无效的默认时区: {}",
                self.default_timezone
            ));
        }

        Ok(())
    }
}

/// 僵尸执行回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    pub enabled: bool,
    pub sweep_interval_seconds: u64,
    /// 运行中记录超过该时长即视为僵尸
    pub max_running_seconds: u64,
    pub batch_size: i64,
    /// 启动时先执行一次回收，处理上次崩溃遗留的记录
    ///
    /// 只回收已运行超过 `max_running_seconds` 的记录，刚崩溃时遗留的记录要等
    /// 之后的周期回收。
    pub sweep_on_startup: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: 300,
            max_running_seconds: 1800,
            batch_size: 100,
            sweep_on_startup: true,
        }
    }
}

impl ReaperConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn max_running(&self) -> chrono::Duration {
        bounded_duration(self.max_running_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sweep_interval_seconds == 0 {
            return Err(anyhow::anyhow!("僵尸检查间隔必须大于0"));
        }

        if self.max_running_seconds == 0 {
            return Err(anyhow::anyhow!("最大运行时长必须大于0"));
        }

        ensure_within_bound("僵尸检查间隔", self.sweep_interval_seconds)?;
        ensure_within_bound("最大运行时长", self.max_running_seconds)?;

        if self.batch_size <= 0 {
            return Err(anyhow::anyhow!("每批回收数量必须大于0"));
        }

        Ok(())
    }
}
