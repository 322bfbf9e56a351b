//! 任务注册表
//!
//! 启动时注册一次，运行期间只由控制面修改暂停状态和元数据，任务不会被删除。
//! 到期检查、暂停和并发实例占用在同一把写锁内完成，暂停操作与
//! "该任务能否触发" 的判断不会交错。

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use ingest_scheduler_core::{
    config::{bounded_duration, checked_duration},
    models::{JobDefinition, JobKwargs, JobMetadata, JobState, JobView, MetadataUpdate},
    traits::{HandlerRegistry, JobHandler},
    SchedulerError, SchedulerResult,
};
use ingest_scheduler_infrastructure::StructuredLogger;

use crate::trigger::JobTrigger;

struct RegisteredJob {
    definition: JobDefinition,
    trigger: JobTrigger,
    handler: Arc<dyn JobHandler>,
    next_fire_time: Option<DateTime<Utc>>,
    running: u32,
}

impl RegisteredJob {
    fn view(&self) -> JobView {
        JobView {
            id: self.definition.id.clone(),
            display_name: self.definition.name().to_string(),
            description: self.definition.description.clone(),
            trigger: self.trigger.describe(),
            timezone: self.definition.timezone.clone(),
            handler: self.definition.handler.clone(),
            paused: self.definition.is_paused(),
            next_fire_time: self.next_fire_time.map(|t| self.trigger.localize(t)),
            running_instances: self.running,
            max_instances: self.definition.max_instances,
            default_kwargs: self.definition.default_kwargs.clone(),
        }
    }

    fn ticket(&self, scheduled_time: DateTime<Utc>, kwargs: JobKwargs, is_manual: bool) -> FireTicket {
        FireTicket {
            job_id: self.definition.id.clone(),
            job_name: self.definition.name().to_string(),
            scheduled_time,
            handler: self.handler.clone(),
            kwargs,
            is_manual,
        }
    }
}

/// 一次已占用并发实例的触发
///
/// 持有者必须在执行结束后调用 [`JobRegistry::release`] 归还实例。
pub struct FireTicket {
    pub job_id: String,
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub handler: Arc<dyn JobHandler>,
    pub kwargs: JobKwargs,
    pub is_manual: bool,
}

impl std::fmt::Debug for FireTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireTicket")
            .field("job_id", &self.job_id)
            .field("scheduled_time", &self.scheduled_time)
            .field("is_manual", &self.is_manual)
            .finish()
    }
}

/// 到期检查的结果
#[derive(Debug)]
pub enum DueFire {
    /// 已占用实例，可以执行
    Fire(FireTicket),
    /// 超过宽限期，同一次检查中连续错过的触发合并为一条
    Missed {
        job_id: String,
        job_name: String,
        scheduled_time: DateTime<Utc>,
        late_seconds: i64,
    },
    /// 已达到最大并发实例数，本次触发跳过
    Skipped { job_id: String, max_instances: u32 },
}

pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, RegisteredJob>>,
    handlers: HandlerRegistry,
    default_timezone: String,
    started_at: DateTime<Utc>,
}

impl JobRegistry {
    pub fn new(handlers: HandlerRegistry, default_timezone: impl Into<String>) -> Self {
        Self {
            jobs: RwLock::new(BTreeMap::new()),
            handlers,
            default_timezone: default_timezone.into(),
            started_at: Utc::now(),
        }
    }

    /// 间隔触发器的起点
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// 注册任务，重复ID、未注册的处理器和无效触发器都会被拒绝
    pub async fn register(&self, mut job: JobDefinition) -> SchedulerResult<JobView> {
        if job.timezone.is_empty() {
            job.timezone = self.default_timezone.clone();
        }
        if job.max_instances == 0 {
            return Err(SchedulerError::InvalidTrigger(format!(
                "任务 {} 的最大并发实例数必须大于0",
                job.id
            )));
        }

        if let Some(grace) = job.misfire_grace_seconds {
            if checked_duration(grace).is_none() {
                return Err(SchedulerError::InvalidTrigger(format!(
                    "任务 {} 的错过执行宽限期过大: {grace}",
                    job.id
                )));
            }
        }

        let trigger = JobTrigger::new(&job.trigger, &job.timezone, self.started_at)?;
        let handler = self
            .handlers
            .get(&job.handler)
            .await
            .ok_or_else(|| SchedulerError::HandlerNotFound {
                name: job.handler.clone(),
            })?;

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::DuplicateJob { id: job.id });
        }

        let next_fire_time = if job.is_paused() {
            None
        } else {
            trigger.next_fire_after(Utc::now())
        };
        StructuredLogger::log_job_registered(
            &job.id,
            &trigger.describe(),
            job.is_paused(),
            next_fire_time,
        );

        let entry = RegisteredJob {
            definition: job,
            trigger,
            handler,
            next_fire_time,
            running: 0,
        };
        let view = entry.view();
        jobs.insert(view.id.clone(), entry);
        Ok(view)
    }

    pub async fn get(&self, id: &str) -> Option<JobView> {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(RegisteredJob::view)
    }

    pub async fn definition(&self, id: &str) -> Option<JobDefinition> {
        let jobs = self.jobs.read().await;
        jobs.get(id).map(|j| j.definition.clone())
    }

    pub async fn list(&self) -> Vec<JobView> {
        let jobs = self.jobs.read().await;
        jobs.values().map(RegisteredJob::view).collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 暂停后没有下一次触发时间；恢复时从当前时刻重新计算
    pub async fn set_paused(&self, id: &str, paused: bool) -> SchedulerResult<JobView> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        if paused {
            job.definition.state = JobState::Paused;
            job.next_fire_time = None;
        } else {
            job.definition.state = JobState::Enabled;
            if job.next_fire_time.is_none() {
                job.next_fire_time = job.trigger.next_fire_after(Utc::now());
            }
        }
        debug!("任务 {} 暂停状态: {}", id, paused);
        Ok(job.view())
    }

    /// 只修改展示名称和备注，不影响触发器和处理器
    pub async fn update_metadata(
        &self,
        id: &str,
        update: &MetadataUpdate,
    ) -> SchedulerResult<JobView> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        if let Some(name) = &update.display_name {
            job.definition.display_name = name.clone();
        }
        if let Some(description) = &update.description {
            job.definition.description = Some(description.clone());
        }
        Ok(job.view())
    }

    /// 启动时应用持久化的元数据，未注册的任务忽略
    pub async fn apply_metadata(&self, entries: &[JobMetadata]) -> usize {
        let mut jobs = self.jobs.write().await;
        let mut applied = 0;
        for entry in entries {
            if let Some(job) = jobs.get_mut(&entry.job_id) {
                if let Some(name) = &entry.display_name {
                    job.definition.display_name = name.clone();
                }
                if entry.description.is_some() {
                    job.definition.description = entry.description.clone();
                }
                applied += 1;
            }
        }
        if applied > 0 {
            info!("已应用 {} 个任务的持久化元数据", applied);
        }
        applied
    }

    /// 取出所有到期的触发并推进下一次触发时间
    pub async fn claim_due(&self, now: DateTime<Utc>, default_grace: Duration) -> Vec<DueFire> {
        let mut jobs = self.jobs.write().await;
        let mut due = Vec::new();

        for job in jobs.values_mut() {
            if job.definition.is_paused() {
                continue;
            }
            let Some(scheduled_time) = job.next_fire_time else {
                continue;
            };
            if scheduled_time > now {
                continue;
            }

            job.next_fire_time = job.trigger.next_fire_after(now);

            let grace = job
                .definition
                .misfire_grace_seconds
                .map(bounded_duration)
                .unwrap_or(default_grace);
            let late = now - scheduled_time;

            if late > grace {
                due.push(DueFire::Missed {
                    job_id: job.definition.id.clone(),
                    job_name: job.definition.name().to_string(),
                    scheduled_time,
                    late_seconds: late.num_seconds(),
                });
            } else if job.running >= job.definition.max_instances {
                due.push(DueFire::Skipped {
                    job_id: job.definition.id.clone(),
                    max_instances: job.definition.max_instances,
                });
            } else {
                job.running += 1;
                let kwargs = job.definition.default_kwargs.clone();
                due.push(DueFire::Fire(job.ticket(scheduled_time, kwargs, false)));
            }
        }
        due
    }

    /// 为手动触发占用实例，不受暂停状态和触发计划影响
    ///
    /// `resume_paused` 为真时同时恢复暂停中的任务。
    pub async fn reserve_manual(
        &self,
        id: &str,
        overrides: Option<&JobKwargs>,
        resume_paused: bool,
        now: DateTime<Utc>,
    ) -> SchedulerResult<FireTicket> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;

        if job.running >= job.definition.max_instances {
            return Err(SchedulerError::JobAlreadyRunning {
                id: id.to_string(),
                max_instances: job.definition.max_instances,
            });
        }

        if resume_paused && job.definition.is_paused() {
            job.definition.state = JobState::Enabled;
            job.next_fire_time = job.trigger.next_fire_after(now);
            info!("手动触发时恢复了暂停中的任务: {}", id);
        }

        job.running += 1;
        let kwargs = job.definition.merged_kwargs(overrides);
        Ok(job.ticket(now, kwargs, true))
    }

    /// 归还执行结束后占用的实例
    pub async fn release(&self, id: &str) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            job.running = job.running.saturating_sub(1);
        }
    }

    pub async fn running_instances(&self, id: &str) -> u32 {
        let jobs = self.jobs.read().await;
        jobs.get(id).map_or(0, |j| j.running)
    }

    /// 所有任务占用的实例总数
    pub async fn total_running(&self) -> u32 {
        let jobs = self.jobs.read().await;
        jobs.values().map(|j| j.running).sum()
    }

    /// 测试和诊断用：直接设置下一次触发时间
    pub async fn set_next_fire_time(
        &self,
        id: &str,
        next: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        job.next_fire_time = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_scheduler_core::models::TriggerSpec;
    use ingest_scheduler_core::traits::handler_fn;

    async fn registry() -> JobRegistry {
        let handlers = HandlerRegistry::new();
        handlers
            .register("noop", handler_fn(|_ctx, _kwargs| async { Ok(None) }))
            .await;
        JobRegistry::new(handlers, "UTC")
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_unknown_handlers() {
        let registry = registry().await;
        let job = JobDefinition::new("a", TriggerSpec::interval(5), "noop");
        registry.register(job.clone()).await.unwrap();

        assert!(matches!(
            registry.register(job).await,
            Err(SchedulerError::DuplicateJob { .. })
        ));
        assert!(matches!(
            registry
                .register(JobDefinition::new("b", TriggerSpec::interval(5), "missing"))
                .await,
            Err(SchedulerError::HandlerNotFound { .. })
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_oversized_misfire_grace_rejected() {
        let registry = registry().await;
        let job = JobDefinition::new("a", TriggerSpec::interval(5), "noop")
            .with_misfire_grace(u64::MAX);
        assert!(matches!(
            registry.register(job).await,
            Err(SchedulerError::InvalidTrigger(_))
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_default_timezone_applied() {
        let handlers = HandlerRegistry::new();
        handlers
            .register("noop", handler_fn(|_ctx, _kwargs| async { Ok(None) }))
            .await;
        let registry = JobRegistry::new(handlers, "Asia/Shanghai");
        let mut job = JobDefinition::new("a", TriggerSpec::cron("0 2 * * *"), "noop");
        job.timezone = String::new();
        let view = registry.register(job).await.unwrap();
        assert_eq!(view.timezone, "Asia/Shanghai");
        let next = view.next_fire_time.unwrap();
        assert_eq!(next.offset().local_minus_utc(), 8 * 3600);
    }

    #[tokio::test]
    async fn test_pause_clears_next_fire_time() {
        let registry = registry().await;
        registry
            .register(JobDefinition::new("a", TriggerSpec::interval(5), "noop"))
            .await
            .unwrap();

        let view = registry.set_paused("a", true).await.unwrap();
        assert!(view.paused);
        assert!(view.next_fire_time.is_none());

        let view = registry.set_paused("a", false).await.unwrap();
        assert!(!view.paused);
        assert!(view.next_fire_time.is_some());

        assert!(matches!(
            registry.set_paused("missing", true).await,
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_claim_due_fires_skips_and_misses() {
        let registry = registry().await;
        registry
            .register(JobDefinition::new("a", TriggerSpec::interval(5), "noop"))
            .await
            .unwrap();

        let now = Utc::now();
        registry.set_next_fire_time("a", Some(now)).await.unwrap();
        let due = registry.claim_due(now, Duration::seconds(30)).await;
        assert!(matches!(due.as_slice(), [DueFire::Fire(t)] if !t.is_manual));
        assert_eq!(registry.running_instances("a").await, 1);

        // 仍在运行时再次到期则跳过
        registry.set_next_fire_time("a", Some(now)).await.unwrap();
        let due = registry.claim_due(now, Duration::seconds(30)).await;
        assert!(matches!(due.as_slice(), [DueFire::Skipped { .. }]));
        assert_eq!(registry.running_instances("a").await, 1);

        // 超过宽限期记录为错过
        registry.release("a").await;
        registry
            .set_next_fire_time("a", Some(now - Duration::minutes(5)))
            .await
            .unwrap();
        let due = registry.claim_due(now, Duration::seconds(30)).await;
        assert!(matches!(due.as_slice(), [DueFire::Missed { late_seconds, .. }] if *late_seconds >= 300));
        assert_eq!(registry.running_instances("a").await, 0);

        let view = registry.get("a").await.unwrap();
        assert!(view.next_fire_time.unwrap() > now.fixed_offset());
    }

    #[tokio::test]
    async fn test_paused_job_not_claimed_but_manual_reserve_allowed() {
        let registry = registry().await;
        registry
            .register(JobDefinition::new("a", TriggerSpec::interval(5), "noop").paused())
            .await
            .unwrap();

        let now = Utc::now() + Duration::hours(1);
        assert!(registry.claim_due(now, Duration::seconds(30)).await.is_empty());

        let ticket = registry.reserve_manual("a", None, false, Utc::now()).await.unwrap();
        assert!(ticket.is_manual);
        assert!(registry.get("a").await.unwrap().paused);

        assert!(matches!(
            registry.reserve_manual("a", None, false, Utc::now()).await,
            Err(SchedulerError::JobAlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_reserve_manual_can_resume() {
        let registry = registry().await;
        registry
            .register(JobDefinition::new("a", TriggerSpec::interval(5), "noop").paused())
            .await
            .unwrap();
        registry.reserve_manual("a", None, true, Utc::now()).await.unwrap();
        let view = registry.get("a").await.unwrap();
        assert!(!view.paused);
        assert!(view.next_fire_time.is_some());
    }

    #[tokio::test]
    async fn test_metadata_does_not_touch_wiring() {
        let registry = registry().await;
        registry
            .register(JobDefinition::new("a", TriggerSpec::interval(5), "noop"))
            .await
            .unwrap();
        let before = registry.get("a").await.unwrap();

        let update = MetadataUpdate {
            display_name: Some("新闻同步".into()),
            description: None,
        };
        let view = registry.update_metadata("a", &update).await.unwrap();
        assert_eq!(view.display_name, "新闻同步");
        assert_eq!(view.trigger, before.trigger);
        assert_eq!(view.handler, before.handler);
        assert_eq!(view.next_fire_time, before.next_fire_time);
    }
}
