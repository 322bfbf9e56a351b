use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    database::DatabaseConfig,
    observability::ObservabilityConfig,
    scheduler::{ReaperConfig, SchedulerConfig, MAX_DURATION_SECONDS},
};
use crate::models::{JobDefinition, TriggerSpec};

/// 环境变量前缀，嵌套字段使用双下划线分隔，例如 `SCHEDULER_DATABASE__URL`
pub const ENV_PREFIX: &str = "SCHEDULER";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub reaper: ReaperConfig,
    pub observability: ObservabilityConfig,
    /// 启动时注册的静态任务定义
    pub jobs: Vec<JobDefinition>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. 配置文件（TOML格式）
    /// 3. 环境变量覆盖（前缀: SCHEDULER_）
    ///
    /// 未指定路径时依次尝试默认位置，都不存在则只使用默认值。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults =
            ConfigBuilder::try_from(&AppConfig::default()).context("生成默认配置失败")?;
        let mut builder = ConfigBuilder::builder().add_source(defaults);

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/scheduler.toml",
                "scheduler.toml",
                "/etc/ingest-scheduler/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.reaper.validate().context("僵尸回收配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        self.validate_jobs().context("任务配置验证失败")?;
        Ok(())
    }

    /// 静态任务的结构检查；CRON表达式在注册时由触发器解析
    fn validate_jobs(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if job.id.trim().is_empty() {
                return Err(anyhow::anyhow!("任务ID不能为空"));
            }
            if !seen.insert(job.id.as_str()) {
                return Err(anyhow::anyhow!("任务ID重复: {}", job.id));
            }
            if job.handler.trim().is_empty() {
                return Err(anyhow::anyhow!("任务 {} 未指定处理器", job.id));
            }
            if job.max_instances == 0 {
                return Err(anyhow::anyhow!("任务 {} 的最大并发实例数必须大于0", job.id));
            }
            if !job.timezone.is_empty() && job.timezone.parse::<chrono_tz::Tz>().is_err() {
                return Err(anyhow::anyhow!(
                    "任务 {} 的时区无效: {}",
                    job.id,
                    job.timezone
                ));
            }
            if let Some(grace) = job.misfire_grace_seconds {
                if grace > MAX_DURATION_SECONDS {
                    return Err(anyhow::anyhow!(
                        "任务 {} 的错过执行宽限期不能超过{}秒",
                        job.id,
                        MAX_DURATION_SECONDS
                    ));
                }
            }
            match &job.trigger {
                TriggerSpec::Interval { seconds } if *seconds == 0 => {
                    return Err(anyhow::anyhow!("任务 {} 的触发间隔必须大于0", job.id));
                }
                TriggerSpec::Interval { seconds } if *seconds > MAX_DURATION_SECONDS => {
                    return Err(anyhow::anyhow!(
                        "任务 {} 的触发间隔不能超过{}秒",
                        job.id,
                        MAX_DURATION_SECONDS
                    ));
                }
                TriggerSpec::Cron { expression } if expression.trim().is_empty() => {
                    return Err(anyhow::anyhow!("任务 {} 的CRON表达式不能为空", job.id));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
