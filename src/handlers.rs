//! 内置演示处理器
//!
//! 真实部署中的数据同步处理器由嵌入方注册，这里的处理器只用于本地运行和联调：
//!
//! - `noop`: 立即成功
//! - `sleep`: 按 `seconds` 参数等待，每秒上报一次进度，可被取消
//! - `batch`: 按 `total`/`batch_size` 参数模拟分批处理，带条目进度

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use ingest_scheduler_core::{
    cancellation::ExecutionContext,
    models::{JobKwargs, ProgressUpdate},
    traits::{handler_fn, HandlerError, HandlerRegistry, HandlerResult, JobHandler},
};

pub async fn builtin_handlers() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    let sleep: Arc<dyn JobHandler> = Arc::new(SleepHandler);
    let batch: Arc<dyn JobHandler> = Arc::new(BatchHandler);
    registry
        .register_batch(vec![
            (
                "noop".to_string(),
                handler_fn(|_ctx, _kwargs| async { Ok(None) }),
            ),
            ("sleep".to_string(), sleep),
            ("batch".to_string(), batch),
        ])
        .await;
    registry
}

fn int_arg(kwargs: &JobKwargs, key: &str, default: u64) -> Result<u64, HandlerError> {
    match kwargs.get(key) {
        None => Ok(default),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| HandlerError::failed(format!("参数 {key} 必须是非负整数: {value}"))),
    }
}

/// 已完成比例，按 `u128` 计算避免大数溢出
fn percent_of(done: u64, total: u64) -> u8 {
    let percent = u128::from(done) * 100 / u128::from(total.max(1));
    percent.min(100) as u8
}

struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, ctx: ExecutionContext, kwargs: JobKwargs) -> HandlerResult {
        let seconds = int_arg(&kwargs, "seconds", 5)?;
        for elapsed in 0..seconds {
            let percent = percent_of(elapsed, seconds);
            ctx.report_progress(percent, Some(&format!("已等待 {elapsed}/{seconds} 秒")))
                .await?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Ok(Some(json!({ "slept_seconds": seconds })))
    }
}

struct BatchHandler;

#[async_trait]
impl JobHandler for BatchHandler {
    async fn run(&self, ctx: ExecutionContext, kwargs: JobKwargs) -> HandlerResult {
        let total = int_arg(&kwargs, "total", 100)?;
        let batch_size = int_arg(&kwargs, "batch_size", 10)?.max(1);
        let delay_ms = int_arg(&kwargs, "delay_ms", 200)?;

        let mut processed = 0u64;
        while processed < total {
            let batch_end = (processed + batch_size).min(total);
            let update = ProgressUpdate::percent(percent_of(processed, total))
                .with_items(processed as i64, total as i64)
                .with_current_item(format!("batch {}-{}", processed + 1, batch_end))
                .with_message("分批处理中");
            ctx.report(update).await?;

            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            processed = batch_end;
        }
        Ok(Some(json!({ "processed": processed })))
    }
}
