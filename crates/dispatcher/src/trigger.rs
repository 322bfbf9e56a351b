//! 触发器引擎
//!
//! 计算下一次触发时间是纯函数：对同一时刻重复计算得到相同结果，不产生副作用。

use chrono::{DateTime, Duration, FixedOffset, Utc};
use chrono_tz::Tz;

use ingest_scheduler_core::{
    config::{checked_duration, MAX_DURATION_SECONDS},
    models::TriggerSpec,
    SchedulerError, SchedulerResult,
};

use crate::cron_utils::CronScheduler;

#[derive(Debug, Clone)]
enum TriggerKind {
    Cron(CronScheduler),
    /// 从 `anchor` 起每隔 `every` 触发一次，首次触发在 anchor + every
    Interval {
        every: Duration,
        anchor: DateTime<Utc>,
    },
}

/// 已解析的任务触发器
#[derive(Debug, Clone)]
pub struct JobTrigger {
    kind: TriggerKind,
    timezone: Tz,
}

impl JobTrigger {
    /// 解析触发器，`anchor` 为间隔触发器的起点（通常是注册表启动时刻）
    pub fn new(spec: &TriggerSpec, timezone: &str, anchor: DateTime<Utc>) -> SchedulerResult<Self> {
        let timezone = parse_timezone(timezone)?;
        let kind = match spec {
            TriggerSpec::Cron { expression } => {
                TriggerKind::Cron(CronScheduler::new(expression, timezone)?)
            }
            TriggerSpec::Interval { seconds } => {
                if *seconds == 0 {
                    return Err(SchedulerError::InvalidTrigger(
                        "触发间隔必须大于0秒".to_string(),
                    ));
                }
                let every = checked_duration(*seconds).ok_or_else(|| {
                    SchedulerError::InvalidTrigger(format!(
                        "触发间隔不能超过{MAX_DURATION_SECONDS}秒: {seconds}"
                    ))
                })?;
                TriggerKind::Interval { every, anchor }
            }
        };
        Ok(Self { kind, timezone })
    }

    /// 严格晚于 `after` 的下一次触发时间
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            TriggerKind::Cron(scheduler) => scheduler.next_execution_time(after),
            TriggerKind::Interval { every, anchor } => {
                let every_ms = every.num_milliseconds();
                let elapsed_ms = (after - *anchor).num_milliseconds();
                let k = if elapsed_ms < 0 {
                    1
                } else {
                    elapsed_ms / every_ms + 1
                };
                anchor.checked_add_signed(Duration::milliseconds(every_ms.checked_mul(k)?))
            }
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// 转换为任务所在时区的本地偏移，用于展示
    pub fn localize(&self, time: DateTime<Utc>) -> DateTime<FixedOffset> {
        time.with_timezone(&self.timezone).fixed_offset()
    }

    /// 人类可读的触发器描述
    pub fn describe(&self) -> String {
        match &self.kind {
            TriggerKind::Cron(scheduler) => {
                format!("cron[{}] {}", scheduler.expression(), self.timezone.name())
            }
            TriggerKind::Interval { every, .. } => {
                let seconds = every.num_seconds();
                match seconds {
                    s if s % 86400 == 0 => format!("interval[{}d]", s / 86400),
                    s if s % 3600 == 0 => format!("interval[{}h]", s / 3600),
                    s if s % 60 == 0 => format!("interval[{}m]", s / 60),
                    s => format!("interval[{s}s]"),
                }
            }
        }
    }
}

pub fn parse_timezone(name: &str) -> SchedulerResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_interval_first_fire_is_anchor_plus_interval() {
        let trigger = JobTrigger::new(&TriggerSpec::interval(5), "UTC", anchor()).unwrap();
        assert_eq!(
            trigger.next_fire_after(anchor()),
            Some(anchor() + Duration::seconds(5))
        );
        assert_eq!(
            trigger.next_fire_after(anchor() - Duration::seconds(30)),
            Some(anchor() + Duration::seconds(5))
        );
    }

    #[test]
    fn test_interval_stays_on_grid() {
        let trigger = JobTrigger::new(&TriggerSpec::interval(5), "UTC", anchor()).unwrap();
        let at = anchor() + Duration::milliseconds(12_300);
        assert_eq!(
            trigger.next_fire_after(at),
            Some(anchor() + Duration::seconds(15))
        );
        // 恰好落在网格上时取下一个点
        let on_grid = anchor() + Duration::seconds(10);
        assert_eq!(
            trigger.next_fire_after(on_grid),
            Some(anchor() + Duration::seconds(15))
        );
    }

    #[test]
    fn test_next_fire_is_idempotent() {
        let trigger =
            JobTrigger::new(&TriggerSpec::cron("*/15 * * * *"), "Asia/Shanghai", anchor()).unwrap();
        let now = anchor() + Duration::minutes(7);
        assert_eq!(trigger.next_fire_after(now), trigger.next_fire_after(now));
        assert_eq!(
            trigger.next_fire_after(now),
            Some(anchor() + Duration::minutes(15))
        );
    }

    #[test]
    fn test_invalid_triggers_rejected() {
        assert!(matches!(
            JobTrigger::new(&TriggerSpec::interval(0), "UTC", anchor()),
            Err(SchedulerError::InvalidTrigger(_))
        ));
        assert!(matches!(
            JobTrigger::new(&TriggerSpec::cron("61 * * * *"), "UTC", anchor()),
            Err(SchedulerError::InvalidCron { .. })
        ));
        assert!(matches!(
            JobTrigger::new(&TriggerSpec::interval(5), "Mars/Olympus", anchor()),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        assert!(matches!(
            JobTrigger::new(&TriggerSpec::interval(10_000_000_000_000_000), "UTC", anchor()),
            Err(SchedulerError::InvalidTrigger(_))
        ));
        assert!(matches!(
            JobTrigger::new(&TriggerSpec::interval(u64::MAX), "UTC", anchor()),
            Err(SchedulerError::InvalidTrigger(_))
        ));
        let yearly = JobTrigger::new(&TriggerSpec::interval(365 * 86_400), "UTC", anchor()).unwrap();
        assert_eq!(
            yearly.next_fire_after(anchor()),
            Some(anchor() + Duration::days(365))
        );
    }

    #[test]
    fn test_describe_and_localize() {
        let cron =
            JobTrigger::new(&TriggerSpec::cron("0 2 * * *"), "Asia/Shanghai", anchor()).unwrap();
        assert_eq!(cron.describe(), "cron[0 2 * * *] Asia/Shanghai");
        let local = cron.localize(anchor());
        assert_eq!(local.offset().local_minus_utc(), 8 * 3600);

        let interval = JobTrigger::new(&TriggerSpec::interval(300), "UTC", anchor()).unwrap();
        assert_eq!(interval.describe(), "interval[5m]");
        let interval = JobTrigger::new(&TriggerSpec::interval(45), "UTC", anchor()).unwrap();
        assert_eq!(interval.describe(), "interval[45s]");
    }
}
