use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use ingest_scheduler_core::{
    config::ReaperConfig,
    models::{ExecutionCompletion, ExecutionRecord, ZOMBIE_ERROR_MESSAGE},
    traits::ExecutionRepository,
    SchedulerResult,
};
use ingest_scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 僵尸执行回收器
///
/// 定期查找开始时间早于阈值、仍处于运行状态的记录并标记为失败。
/// 阈值对所有任务统一生效；与协调器的收尾使用同一个条件更新，
/// 两者以任意顺序到达都只有一方生效。
pub struct ZombieReaper {
    executions: Arc<dyn ExecutionRepository>,
    metrics: Arc<MetricsCollector>,
    config: ReaperConfig,
}

impl ZombieReaper {
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        metrics: Arc<MetricsCollector>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            executions,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &ReaperConfig {
        &self.config
    }

    /// 执行一次回收，返回本次被标记为失败的记录
    pub async fn sweep(&self, now: DateTime<Utc>) -> SchedulerResult<Vec<ExecutionRecord>> {
        let threshold = now - self.config.max_running();
        let stale = self
            .executions
            .find_stale_running(threshold, self.config.batch_size)
            .await?;
        if stale.is_empty() {
            debug!("没有需要回收的僵尸执行");
            return Ok(Vec::new());
        }

        let mut reaped = Vec::with_capacity(stale.len());
        for mut record in stale {
            let elapsed = record.elapsed_seconds(now);
            let completion =
                ExecutionCompletion::failed(now, elapsed, ZOMBIE_ERROR_MESSAGE, None);
            if self
                .executions
                .complete_if_running(record.id, &completion)
                .await?
            {
                StructuredLogger::log_zombie_reaped(record.id, &record.job_id, elapsed);
                completion.apply_to(&mut record);
                reaped.push(record);
            } else {
                debug!("执行记录 {} 已在回收前进入终态", record.id);
            }
        }

        self.metrics.record_reaped(reaped.len() as u64);
        info!("本次回收了 {} 个僵尸执行", reaped.len());
        Ok(reaped)
    }

    /// 周期回收循环，收到关闭信号后退出
    pub async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("僵尸执行回收已禁用");
            return;
        }

        let mut interval = tokio::time::interval(self.config.sweep_interval());
        // 第一次tick立即完成
        interval.tick().await;
        if self.config.sweep_on_startup {
            self.sweep_logged().await;
        }
        info!(
            "僵尸执行回收已启动，间隔 {}秒，阈值 {}秒",
            self.config.sweep_interval_seconds, self.config.max_running_seconds
        );

        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_logged().await,
                _ = shutdown.recv() => {
                    info!("僵尸执行回收收到关闭信号");
                    break;
                }
            }
        }
    }

    async fn sweep_logged(&self) {
        if let Err(e) = self.sweep(Utc::now()).await {
            error!("僵尸执行回收失败: {}", e);
        }
    }
}
