#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::watch;

use ingest_scheduler_core::{
    cancellation::ExecutionContext,
    config::{AppConfig, MEMORY_DATABASE_URL},
    models::{ExecutionRecord, ExecutionStatus, JobDefinition, JobKwargs},
    traits::{handler_fn, HandlerError, HandlerRegistry, HandlerResult, JobHandler},
};
use ingest_scheduler_dispatcher::{ControlPlane, SchedulerContext};

/// 由测试控制放行时机的闸门
#[derive(Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// 测试用处理器集合
///
/// - `noop`: 立即成功
/// - `echo`: 把收到的参数作为返回值
/// - `fail`: 返回带堆栈的失败
/// - `panic`: 直接panic
/// - `gated`: 等待闸门打开后成功
/// - `cancellable`: 每20ms上报一次进度，直到被取消
pub struct TestHandlers {
    pub registry: HandlerRegistry,
    pub gate: Gate,
    pub gated_calls: Arc<AtomicUsize>,
}

impl TestHandlers {
    pub async fn new() -> Self {
        let registry = HandlerRegistry::new();
        let gate = Gate::new();
        let gated_calls = Arc::new(AtomicUsize::new(0));

        registry
            .register("noop", handler_fn(|_ctx, _kwargs| async { Ok(None) }))
            .await;
        registry
            .register(
                "echo",
                handler_fn(|_ctx, kwargs| async move {
                    Ok(Some(serde_json::Value::Object(kwargs)))
                }),
            )
            .await;
        registry
            .register(
                "fail",
                handler_fn(|_ctx, _kwargs| async {
                    Err(HandlerError::with_traceback(
                        "上游接口返回 502",
                        "fetch_quotes -> http_get",
                    ))
                }),
            )
            .await;
        registry
            .register(
                "panic",
                handler_fn(|_ctx, _kwargs| async {
                    if true {
                        panic!("数据格式错误");
                    }
                    Ok(None)
                }),
            )
            .await;

        let gated_gate = gate.clone();
        let calls = gated_calls.clone();
        registry
            .register(
                "gated",
                handler_fn(move |_ctx, _kwargs| {
                    let mut rx = gated_gate.subscribe();
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        let _ = rx.wait_for(|open| *open).await.is_ok();
                        Ok(Some(json!("released")))
                    }
                }),
            )
            .await;

        registry
            .register("cancellable", Arc::new(ProgressReporter))
            .await;

        Self {
            registry,
            gate,
            gated_calls,
        }
    }

    pub fn gated_calls(&self) -> usize {
        self.gated_calls.load(Ordering::SeqCst)
    }
}

/// 每20ms上报一次进度，收到取消信号时向上传递
struct ProgressReporter;

#[async_trait]
impl JobHandler for ProgressReporter {
    async fn run(&self, ctx: ExecutionContext, _kwargs: JobKwargs) -> HandlerResult {
        for i in 0..500u32 {
            ctx.report_progress((i % 100) as u8, Some("处理中")).await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(None)
    }
}

pub fn memory_config(jobs: Vec<JobDefinition>) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = MEMORY_DATABASE_URL.to_string();
    config.scheduler.tick_interval_ms = 100;
    config.scheduler.shutdown_timeout_seconds = 5;
    config.jobs = jobs;
    config
}

pub async fn memory_context(jobs: Vec<JobDefinition>) -> (SchedulerContext, TestHandlers) {
    let handlers = TestHandlers::new().await;
    let context = SchedulerContext::build(memory_config(jobs), handlers.registry.clone())
        .await
        .unwrap();
    (context, handlers)
}

/// 轮询直到执行记录进入给定状态
pub async fn wait_for_status(
    control: &ControlPlane,
    execution_id: i64,
    status: ExecutionStatus,
) -> ExecutionRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = control.get_execution(execution_id).await.unwrap();
        if record.status == status {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution {execution_id} stuck in {} (expected {status})",
            record.status
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// 轮询直到条件成立
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
