use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// 任务处理器的关键字参数（JSON对象）
pub type JobKwargs = serde_json::Map<String, serde_json::Value>;

/// 触发器定义
///
/// `Cron` 使用标准5字段crontab表达式（分 时 日 月 周），也接受带秒字段的6/7字段表达式；
/// `Interval` 从注册表启动时刻起每隔固定秒数触发一次。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    Cron { expression: String },
    Interval { seconds: u64 },
}

impl TriggerSpec {
    pub fn cron(expression: impl Into<String>) -> Self {
        TriggerSpec::Cron {
            expression: expression.into(),
        }
    }

    pub fn interval(seconds: u64) -> Self {
        TriggerSpec::Interval { seconds }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Enabled,
    Paused,
}

/// 任务定义
///
/// `id` 在注册后不可变；`display_name` 和 `description` 可由操作员修改，
/// 与触发器和处理器的绑定相互独立。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: String,
    /// 为空时使用 `id`
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger: TriggerSpec,
    /// IANA时区名，为空时使用调度器的默认时区
    #[serde(default)]
    pub timezone: String,
    pub handler: String,
    #[serde(default)]
    pub default_kwargs: JobKwargs,
    #[serde(default)]
    pub state: JobState,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    /// 单任务的错过执行宽限期，为空时使用全局配置
    #[serde(default)]
    pub misfire_grace_seconds: Option<u64>,
}

fn default_max_instances() -> u32 {
    1
}

impl JobDefinition {
    pub fn new(
        id: impl Into<String>,
        trigger: TriggerSpec,
        handler: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            description: None,
            trigger,
            timezone: "UTC".to_string(),
            handler: handler.into(),
            default_kwargs: JobKwargs::new(),
            state: JobState::Enabled,
            max_instances: default_max_instances(),
            misfire_grace_seconds: None,
        }
    }

    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_misfire_grace(mut self, seconds: u64) -> Self {
        self.misfire_grace_seconds = Some(seconds);
        self
    }

    /// 操作员可见的名称，未配置时回退为任务ID
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_kwargs(mut self, kwargs: JobKwargs) -> Self {
        self.default_kwargs = kwargs;
        self
    }

    pub fn paused(mut self) -> Self {
        self.state = JobState::Paused;
        self
    }

    pub fn is_paused(&self) -> bool {
        self.state == JobState::Paused
    }

    /// 合并手动触发时传入的参数，覆盖同名的默认参数，仅对本次调用生效
    pub fn merged_kwargs(&self, overrides: Option<&JobKwargs>) -> JobKwargs {
        let mut merged = self.default_kwargs.clone();
        if let Some(overrides) = overrides {
            for (key, value) in overrides {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

/// 操作员修改的任务元数据，持久化后在重启时覆盖静态配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetadata {
    pub job_id: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 元数据更新请求，字段为空表示保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub display_name: Option<String>,
    pub description: Option<String>,
}

/// 面向操作员的任务视图
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: String,
    pub display_name: String,
    pub description: Option<String>,
    pub trigger: String,
    pub timezone: String,
    pub handler: String,
    pub paused: bool,
    /// 以任务所在时区的本地偏移表示
    pub next_fire_time: Option<DateTime<FixedOffset>>,
    pub running_instances: u32,
    pub max_instances: u32,
    pub default_kwargs: JobKwargs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merged_kwargs_overrides_defaults_only_for_call() {
        let mut defaults = JobKwargs::new();
        defaults.insert("market".into(), json!("cn"));
        defaults.insert("batch_size".into(), json!(100));
        let job = JobDefinition::new("quotes_sync", TriggerSpec::interval(30), "noop")
            .with_kwargs(defaults);

        let mut overrides = JobKwargs::new();
        overrides.insert("batch_size".into(), json!(10));
        overrides.insert("force".into(), json!(true));

        let merged = job.merged_kwargs(Some(&overrides));
        assert_eq!(merged["market"], json!("cn"));
        assert_eq!(merged["batch_size"], json!(10));
        assert_eq!(merged["force"], json!(true));
        assert_eq!(job.default_kwargs["batch_size"], json!(100));
        assert!(!job.default_kwargs.contains_key("force"));
    }

    #[test]
    fn test_job_definition_defaults_from_toml() {
        let job: JobDefinition = toml::from_str(
            r#"
            id = "news_sync"
            handler = "noop"
            trigger = { type = "cron", expression = "*/5 * * * *" }
            "#,
        )
        .unwrap();
        assert!(job.timezone.is_empty());
        assert_eq!(job.max_instances, 1);
        assert_eq!(job.state, JobState::Enabled);
        assert!(job.default_kwargs.is_empty());
        assert_eq!(job.name(), "news_sync");
    }

    #[test]
    fn test_trigger_spec_deserialize() {
        let spec: TriggerSpec =
            serde_json::from_value(json!({"type": "cron", "expression": "0 2 * * *"})).unwrap();
        assert_eq!(spec, TriggerSpec::cron("0 2 * * *"));

        let spec: TriggerSpec =
            serde_json::from_value(json!({"type": "interval", "seconds": 5})).unwrap();
        assert_eq!(spec, TriggerSpec::interval(5));
    }
}
