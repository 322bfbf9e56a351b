//! 执行协调器
//!
//! 负责把到期的触发转换为执行记录并启动处理器，处理器的结果通过通道交给
//! 唯一的收尾任务写回账本。协调器本身从不等待处理器结束。
//!
//! ```text
//! tick ──claim_due──▶ Fire ──create(running)──▶ spawn(handler)
//!                  │                                   │
//!                  ├─ Missed ──create(missed)          ▼
//!                  └─ Skipped (仅记录日志)       FinalizeMessage ──▶ 收尾任务 ──▶ 对账
//! ```

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use ingest_scheduler_core::{
    cancellation::ExecutionContext,
    config::SchedulerConfig,
    models::{
        ExecutionCompletion, ExecutionRecord, ExecutionStatus, JobKwargs, CANCELLED_ERROR_MESSAGE,
    },
    traits::{ExecutionRepository, HandlerError, HandlerResult},
    SchedulerResult,
};
use ingest_scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::registry::{DueFire, FireTicket, JobRegistry};

/// 处理器的执行结果
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success(Option<serde_json::Value>),
    Failed {
        message: String,
        traceback: Option<String>,
    },
    /// 处理器在检查点收到取消信号并向上传递
    Cancelled,
    /// 处理器panic或被运行时中止
    Aborted(String),
}

impl ExecutionOutcome {
    pub fn from_handler(result: HandlerResult) -> Self {
        match result {
            Ok(value) => ExecutionOutcome::Success(value),
            Err(HandlerError::Cancelled(_)) => ExecutionOutcome::Cancelled,
            Err(HandlerError::Failed { message, traceback }) => {
                ExecutionOutcome::Failed { message, traceback }
            }
        }
    }

    fn from_join_error(err: JoinError) -> Self {
        if err.is_cancelled() {
            return ExecutionOutcome::Aborted("处理器任务被中止".to_string());
        }
        let payload = err.into_panic();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "未知panic".to_string()
        };
        ExecutionOutcome::Aborted(format!("处理器panic: {message}"))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn to_completion(&self, finished_at: DateTime<Utc>, execution_time: f64) -> ExecutionCompletion {
        match self {
            ExecutionOutcome::Success(value) => {
                let return_value = value.as_ref().map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                ExecutionCompletion::success(finished_at, execution_time, return_value)
            }
            ExecutionOutcome::Failed { message, traceback } => ExecutionCompletion::failed(
                finished_at,
                execution_time,
                message.clone(),
                traceback.clone(),
            ),
            ExecutionOutcome::Cancelled => {
                ExecutionCompletion::failed(finished_at, execution_time, CANCELLED_ERROR_MESSAGE, None)
            }
            ExecutionOutcome::Aborted(message) => ExecutionCompletion::failed(
                finished_at,
                execution_time,
                message.clone(),
                Some(message.clone()),
            ),
        }
    }
}

/// 处理器结束后发给收尾任务的消息
#[derive(Debug, Clone)]
pub struct FinalizeMessage {
    pub execution_id: i64,
    pub job_id: String,
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub is_manual: bool,
    pub started_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
}

/// 对账结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// 记录从运行状态转入终态
    Completed(i64),
    /// 记录已经是终态，迟到的结果被丢弃
    Dropped,
    /// 找不到可用的运行记录，新插入了一条终态记录
    Inserted(i64),
}

/// 单次检查的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: usize,
    pub missed: usize,
    pub skipped: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.fired == 0 && self.missed == 0 && self.skipped == 0
    }
}

/// 收尾任务的状态，协调器持有一份用于同步对账
#[derive(Clone)]
struct Finalizer {
    registry: Arc<JobRegistry>,
    executions: Arc<dyn ExecutionRepository>,
    metrics: Arc<MetricsCollector>,
    window: Duration,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Finalizer {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<FinalizeMessage>) {
        debug!("执行收尾任务已启动");
        while let Some(message) = rx.recv().await {
            self.finalize(message).await;
        }
        debug!("执行收尾任务已退出");
    }

    /// 对账后才归还实例，同一任务在任意时刻最多只有 max_instances 条运行记录
    async fn finalize(&self, message: FinalizeMessage) -> Option<Reconciliation> {
        let now = Utc::now();
        let duration = ((now - message.started_at).num_milliseconds() as f64 / 1000.0).max(0.0);

        let result = match self.reconcile(&message, now).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!(
                    "执行记录 {} (任务: {}) 对账失败: {}",
                    message.execution_id, message.job_id, e
                );
                None
            }
        };

        self.registry.release(&message.job_id).await;
        self.metrics
            .record_finished(message.outcome.is_success(), duration);
        self.in_flight
            .send_modify(|n| *n = n.saturating_sub(1));
        result
    }

    async fn reconcile(
        &self,
        message: &FinalizeMessage,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Reconciliation> {
        if let Some(record) = self.executions.get_by_id(message.execution_id).await? {
            if record.is_running() {
                return self.complete(&record, message, now).await;
            }
            self.drop_late(record.id, &record.job_id, record.status);
            return Ok(Reconciliation::Dropped);
        }

        // 原记录已被删除：在新鲜度窗口内找该任务最近的运行记录
        let since = now - self.window;
        if let Some(record) = self
            .executions
            .find_latest_running(&message.job_id, since)
            .await?
        {
            warn!(
                "执行记录 {} 不存在，改为完成任务 {} 最近的运行记录 {}",
                message.execution_id, message.job_id, record.id
            );
            return self.complete(&record, message, now).await;
        }

        let mut record = ExecutionRecord::running(
            &message.job_id,
            &message.job_name,
            message.scheduled_time,
            message.is_manual,
        );
        record.start_timestamp = message.started_at;
        let elapsed = record.elapsed_seconds(now);
        let completion = message.outcome.to_completion(now, elapsed);
        completion.apply_to(&mut record);
        let record = self.executions.create(&record).await?;
        warn!(
            "执行记录 {} 不存在且没有可用的运行记录，已插入新的终态记录 {}",
            message.execution_id, record.id
        );
        StructuredLogger::log_execution_completed(
            record.id,
            &record.job_id,
            record.status,
            elapsed,
            record.error_message.as_deref(),
        );
        Ok(Reconciliation::Inserted(record.id))
    }

    async fn complete(
        &self,
        record: &ExecutionRecord,
        message: &FinalizeMessage,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Reconciliation> {
        let elapsed = record.elapsed_seconds(now);
        let completion = message.outcome.to_completion(now, elapsed);
        if self
            .executions
            .complete_if_running(record.id, &completion)
            .await?
        {
            StructuredLogger::log_execution_completed(
                record.id,
                &record.job_id,
                completion.status,
                elapsed,
                completion.error_message.as_deref(),
            );
            return Ok(Reconciliation::Completed(record.id));
        }

        // 条件更新落空：回收器或操作员抢先写入了终态
        let current = self
            .executions
            .get_by_id(record.id)
            .await?
            .map_or(ExecutionStatus::Failed, |r| r.status);
        self.drop_late(record.id, &record.job_id, current);
        Ok(Reconciliation::Dropped)
    }

    fn drop_late(&self, execution_id: i64, job_id: &str, current: ExecutionStatus) {
        StructuredLogger::log_late_completion(execution_id, job_id, current);
        self.metrics.record_late_completion();
    }
}

pub struct ExecutionCoordinator {
    registry: Arc<JobRegistry>,
    executions: Arc<dyn ExecutionRepository>,
    metrics: Arc<MetricsCollector>,
    config: SchedulerConfig,
    finalizer: Finalizer,
    finalize_tx: mpsc::UnboundedSender<FinalizeMessage>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl ExecutionCoordinator {
    /// 创建协调器并启动收尾任务，必须在tokio运行时中调用
    pub fn new(
        registry: Arc<JobRegistry>,
        executions: Arc<dyn ExecutionRepository>,
        metrics: Arc<MetricsCollector>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (in_flight, _) = watch::channel(0usize);
        let in_flight = Arc::new(in_flight);
        let finalizer = Finalizer {
            registry: registry.clone(),
            executions: executions.clone(),
            metrics: metrics.clone(),
            window: config.reconciliation_window(),
            in_flight: in_flight.clone(),
        };
        let (finalize_tx, finalize_rx) = mpsc::unbounded_channel();
        tokio::spawn(finalizer.clone().run(finalize_rx));

        Arc::new(Self {
            registry,
            executions,
            metrics,
            config,
            finalizer,
            finalize_tx,
            in_flight,
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 已启动但尚未完成对账的执行数
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// 检查并启动所有到期的任务
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let grace = self.config.misfire_grace();
        let mut report = TickReport::default();

        for due in self.registry.claim_due(now, grace).await {
            match due {
                DueFire::Fire(ticket) => {
                    let job_id = ticket.job_id.clone();
                    match self.dispatch(ticket).await {
                        Ok(_) => report.fired += 1,
                        Err(e) => error!("任务 {} 启动失败: {}", job_id, e),
                    }
                }
                DueFire::Missed {
                    job_id,
                    job_name,
                    scheduled_time,
                    late_seconds,
                } => {
                    let record = ExecutionRecord::missed(&job_id, &job_name, scheduled_time);
                    match self.executions.create(&record).await {
                        Ok(_) => {
                            StructuredLogger::log_execution_missed(
                                &job_id,
                                scheduled_time,
                                late_seconds,
                            );
                            self.metrics.record_missed();
                            report.missed += 1;
                        }
                        Err(e) => error!("任务 {} 写入错过执行记录失败: {}", job_id, e),
                    }
                }
                DueFire::Skipped {
                    job_id,
                    max_instances,
                } => {
                    StructuredLogger::log_execution_skipped(&job_id, max_instances);
                    self.metrics.record_skipped();
                    report.skipped += 1;
                }
            }
        }
        report
    }

    /// 手动触发，返回已创建的运行记录，处理器在后台执行
    pub async fn trigger_manual(
        &self,
        job_id: &str,
        kwargs: Option<&JobKwargs>,
    ) -> SchedulerResult<ExecutionRecord> {
        let ticket = self
            .registry
            .reserve_manual(
                job_id,
                kwargs,
                self.config.resume_paused_on_trigger,
                Utc::now(),
            )
            .await?;
        self.dispatch(ticket).await
    }

    /// 写入运行记录并在后台启动处理器
    pub async fn dispatch(&self, ticket: FireTicket) -> SchedulerResult<ExecutionRecord> {
        let record = ExecutionRecord::running(
            &ticket.job_id,
            &ticket.job_name,
            ticket.scheduled_time,
            ticket.is_manual,
        );
        let record = match self.executions.create(&record).await {
            Ok(record) => record,
            Err(e) => {
                self.registry.release(&ticket.job_id).await;
                return Err(e);
            }
        };

        StructuredLogger::log_execution_started(&record);
        self.metrics.record_fired(record.is_manual);
        self.in_flight.send_modify(|n| *n += 1);

        let ctx = ExecutionContext::new(
            record.id,
            &record.job_id,
            record.scheduled_time,
            record.is_manual,
            self.executions.clone(),
        );
        let FireTicket {
            job_id,
            job_name,
            scheduled_time,
            handler,
            kwargs,
            is_manual,
        } = ticket;
        let execution_id = record.id;
        let started_at = record.start_timestamp;
        let finalize_tx = self.finalize_tx.clone();

        tokio::spawn(async move {
            let handle = tokio::spawn(async move { handler.run(ctx, kwargs).await });
            let outcome = match handle.await {
                Ok(result) => ExecutionOutcome::from_handler(result),
                Err(e) => ExecutionOutcome::from_join_error(e),
            };
            let message = FinalizeMessage {
                execution_id,
                job_id,
                job_name,
                scheduled_time,
                is_manual,
                started_at,
                outcome,
            };
            if let Err(e) = finalize_tx.send(message) {
                error!(
                    "收尾任务已退出，执行记录 {} 的结果未写回: {:?}",
                    execution_id, e.0.outcome
                );
            }
        });

        Ok(record)
    }

    /// 同步执行一次收尾，与后台收尾任务使用同一套对账逻辑
    pub async fn finalize(&self, message: FinalizeMessage) -> Option<Reconciliation> {
        self.finalizer.finalize(message).await
    }

    /// 调度主循环，收到关闭信号后退出
    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "调度循环已启动，检查间隔 {}ms",
            self.config.tick_interval_ms
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick(Utc::now()).await;
                    if !report.is_empty() {
                        debug!(
                            "本次检查: 启动 {} 个, 错过 {} 个, 跳过 {} 个",
                            report.fired, report.missed, report.skipped
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 等待所有执行完成对账，超时返回 `false`
    pub async fn wait_idle(&self, timeout: StdDuration) -> bool {
        let mut rx = self.in_flight.subscribe();
        let idle = match tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await {
            Ok(_) => true,
            Err(_) => {
                warn!("等待执行结束超时，仍有 {} 个执行未完成", self.in_flight());
                false
            }
        };
        idle
    }
}
