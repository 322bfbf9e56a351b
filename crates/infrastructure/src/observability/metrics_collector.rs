//! 调度器指标
//!
//! 基于 `metrics` 门面记录，未安装导出器时所有记录都是空操作。

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// Metrics collector for the scheduler
pub struct MetricsCollector {
    executions_fired_total: Counter,
    manual_triggers_total: Counter,
    executions_succeeded_total: Counter,
    executions_failed_total: Counter,
    executions_missed_total: Counter,
    executions_skipped_total: Counter,
    zombies_reaped_total: Counter,
    cancel_requests_total: Counter,
    late_completions_total: Counter,
    execution_duration: Histogram,
    running_executions: Gauge,
    registered_jobs: Gauge,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            executions_fired_total: counter!("ingest_scheduler_executions_fired_total"),
            manual_triggers_total: counter!("ingest_scheduler_manual_triggers_total"),
            executions_succeeded_total: counter!("ingest_scheduler_executions_succeeded_total"),
            executions_failed_total: counter!("ingest_scheduler_executions_failed_total"),
            executions_missed_total: counter!("ingest_scheduler_executions_missed_total"),
            executions_skipped_total: counter!("ingest_scheduler_executions_skipped_total"),
            zombies_reaped_total: counter!("ingest_scheduler_zombies_reaped_total"),
            cancel_requests_total: counter!("ingest_scheduler_cancel_requests_total"),
            late_completions_total: counter!("ingest_scheduler_late_completions_total"),
            execution_duration: histogram!("ingest_scheduler_execution_duration_seconds"),
            running_executions: gauge!("ingest_scheduler_running_executions"),
            registered_jobs: gauge!("ingest_scheduler_registered_jobs"),
        }
    }

    pub fn record_fired(&self, is_manual: bool) {
        self.executions_fired_total.increment(1);
        if is_manual {
            self.manual_triggers_total.increment(1);
        }
        self.running_executions.increment(1.0);
    }

    /// 处理器返回后调用，无论对账结果如何都会减少运行计数
    pub fn record_finished(&self, success: bool, duration_seconds: f64) {
        if success {
            self.executions_succeeded_total.increment(1);
        } else {
            self.executions_failed_total.increment(1);
        }
        self.execution_duration.record(duration_seconds);
        self.running_executions.decrement(1.0);
    }

    pub fn record_missed(&self) {
        self.executions_missed_total.increment(1);
    }

    pub fn record_skipped(&self) {
        self.executions_skipped_total.increment(1);
    }

    pub fn record_reaped(&self, count: u64) {
        self.zombies_reaped_total.increment(count);
    }

    pub fn record_cancel_request(&self) {
        self.cancel_requests_total.increment(1);
    }

    pub fn record_late_completion(&self) {
        self.late_completions_total.increment(1);
    }

    pub fn set_registered_jobs(&self, count: usize) {
        self.registered_jobs.set(count as f64);
    }
}
