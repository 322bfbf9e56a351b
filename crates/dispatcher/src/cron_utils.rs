use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::debug;

use ingest_scheduler_core::{SchedulerError, SchedulerResult};

const WEEKDAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// CRON表达式解析和调度工具
///
/// 接受标准5字段crontab表达式（分 时 日 月 周），内部补齐秒字段；
/// 6/7字段表达式（含秒、可选年）原样交给 `cron` 解析。
/// 下一次触发时间按任务所在时区计算。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronScheduler {
    pub fn new(cron_expr: &str, timezone: Tz) -> SchedulerResult<Self> {
        let normalized = Self::normalize(cron_expr)?;
        let schedule = Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        debug!("解析CRON表达式: {} -> {}", cron_expr, normalized);

        Ok(Self {
            expression: cron_expr.trim().to_string(),
            schedule,
            timezone,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// 严格晚于给定时刻的下一次触发时间
    pub fn next_execution_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .take(count)
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr, Tz::UTC).map(|_| ())
    }

    /// 转换为 `cron` 使用的带秒格式
    ///
    /// 5字段表达式中的数字星期按crontab约定解释（0和7都是周日），
    /// 改写为英文缩写后再交给 `cron`，后者的数字星期从1（周日）开始。
    pub fn normalize(cron_expr: &str) -> SchedulerResult<String> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        match fields.len() {
            5 => {
                let weekday = Self::rewrite_weekdays(fields[4]).map_err(|message| {
                    SchedulerError::InvalidCron {
                        expr: cron_expr.to_string(),
                        message,
                    }
                })?;
                Ok(format!(
                    "0 {} {} {} {} {}",
                    fields[0], fields[1], fields[2], fields[3], weekday
                ))
            }
            6 | 7 => Ok(fields.join(" ")),
            n => Err(SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: format!("字段数量必须为5、6或7，实际为{n}"),
            }),
        }
    }

    fn rewrite_weekdays(field: &str) -> Result<String, String> {
        let items: Result<Vec<String>, String> =
            field.split(',').map(Self::rewrite_weekday_item).collect();
        Ok(items?.join(","))
    }

    fn rewrite_weekday_item(item: &str) -> Result<String, String> {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let with_step = |range: String| match step {
            Some(step) => format!("{range}/{step}"),
            None => range,
        };

        if let Some((start, end)) = range.split_once('-') {
            let (Some(start), Some(end)) = (Self::weekday_number(start)?, Self::weekday_number(end)?)
            else {
                return Ok(item.to_string());
            };
            if start > end && end != 0 {
                return Err(format!("星期范围无效: {range}"));
            }
            // 以7（周日）结尾的范围拆成 start-SAT 加 SUN，`cron` 中SUN排在最前
            if end == 7 || (end == 0 && start > 0) {
                match start {
                    0 => return Ok(with_step("SUN-SAT".to_string())),
                    7 => return Ok(with_step("SUN".to_string())),
                    _ => {}
                }
                let head = with_step(format!("{}-SAT", WEEKDAY_NAMES[start]));
                return Ok(if step.is_some() { head } else { format!("{head},SUN") });
            }
            return Ok(with_step(format!(
                "{}-{}",
                WEEKDAY_NAMES[start], WEEKDAY_NAMES[end]
            )));
        }

        match Self::weekday_number(range)? {
            Some(day) => Ok(with_step(WEEKDAY_NAMES[day].to_string())),
            None => Ok(item.to_string()),
        }
    }

    /// 数字星期转为下标；非数字（`*`、英文缩写）返回 `None`
    fn weekday_number(token: &str) -> Result<Option<usize>, String> {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            return Ok(None);
        }
        match token.parse::<usize>() {
            Ok(day) if day <= 7 => Ok(Some(day)),
            _ => Err(format!("星期取值超出范围: {token}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Weekday};

    #[test]
    fn test_normalize_five_field_expression() {
        assert_eq!(CronScheduler::normalize("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(
            CronScheduler::normalize("0 9 * * 1-5").unwrap(),
            "0 0 9 * * MON-FRI"
        );
        assert_eq!(CronScheduler::normalize("0 0 * * 0").unwrap(), "0 0 0 * * SUN");
        assert_eq!(CronScheduler::normalize("0 0 * * 7").unwrap(), "0 0 0 * * SUN");
        assert_eq!(
            CronScheduler::normalize("0 0 * * 5-7").unwrap(),
            "0 0 0 * * FRI-SAT,SUN"
        );
        assert_eq!(
            CronScheduler::normalize("0 0 * * 1,3,mon").unwrap(),
            "0 0 0 * * MON,WED,mon"
        );
        assert_eq!(
            CronScheduler::normalize("30 0 0 * * *").unwrap(),
            "30 0 0 * * *"
        );
        assert!(CronScheduler::normalize("* * *").is_err());
        assert!(CronScheduler::normalize("0 0 * * 8").is_err());
    }

    #[test]
    fn test_next_execution_time_strictly_after() {
        let scheduler = CronScheduler::new("0 * * * *", Tz::UTC).unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let next = scheduler.next_execution_time(on_the_hour).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_timezone_is_applied() {
        let scheduler = CronScheduler::new("0 2 * * *", chrono_tz::Asia::Shanghai).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let next = scheduler.next_execution_time(now).unwrap();
        // 上海 02:00 对应 UTC 前一天 18:00
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 18, 0, 0).unwrap());
    }

    #[test]
    fn test_crontab_weekday_numbering() {
        let scheduler = CronScheduler::new("0 9 * * 1", Tz::UTC).unwrap();
        // 2024-01-03 是周三
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let next = scheduler.next_execution_time(now).unwrap();
        assert_eq!(next.weekday(), Weekday::Mon);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn test_validate_cron_expression() {
        assert!(CronScheduler::validate_cron_expression("0 0 * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("*/30 * * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("0 9-17 * * MON-FRI").is_ok());
        assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
        assert!(CronScheduler::validate_cron_expression("invalid").is_err());
        assert!(CronScheduler::validate_cron_expression("0 0 32 * *").is_err());
        assert!(CronScheduler::validate_cron_expression("").is_err());
    }

    #[test]
    fn test_upcoming_times() {
        let scheduler = CronScheduler::new("0 * * * *", Tz::UTC).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        let upcoming = scheduler.upcoming_times(now, 3);
        assert_eq!(upcoming.len(), 3);
        assert_eq!(upcoming[0].hour(), 13);
        assert_eq!(upcoming[2].hour(), 15);
    }
}
