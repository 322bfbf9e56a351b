mod common;

use std::time::Duration;

use ingest_scheduler_core::{
    models::{ExecutionFilter, ExecutionStatus, JobDefinition, MetadataUpdate, TriggerSpec},
    SchedulerError,
};
use ingest_scheduler_dispatcher::SchedulerContext;

use common::{memory_config, memory_context, TestHandlers};

#[tokio::test]
async fn test_interval_job_runs_end_to_end() {
    let job = JobDefinition::new("heartbeat", TriggerSpec::interval(5), "noop");
    let (context, _handlers) = memory_context(vec![job]).await;
    context.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(11_000)).await;
    context.shutdown().await;

    let control = context.control();
    let filter = ExecutionFilter::for_job("heartbeat").with_status(ExecutionStatus::Success);
    let mut runs = control.list_executions(&filter).await.unwrap();
    assert!(runs.len() >= 2, "only {} successful runs", runs.len());

    runs.sort_by_key(|r| r.scheduled_time);
    for pair in runs.windows(2) {
        let scheduled_gap = (pair[1].scheduled_time - pair[0].scheduled_time).num_milliseconds();
        assert_eq!(scheduled_gap, 5_000);
        let started_gap = (pair[1].start_timestamp - pair[0].start_timestamp).num_milliseconds();
        assert!(
            (4_000..=6_000).contains(&started_gap),
            "runs started {started_gap}ms apart"
        );
    }
    assert!(runs.iter().all(|r| !r.is_manual));
}

#[tokio::test]
async fn test_sqlite_context_persists_metadata_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("scheduler.db").display());
    let job = JobDefinition::new("news_sync", TriggerSpec::cron("0 * * * *"), "noop");

    let mut config = memory_config(vec![job]);
    config.database.url = url;

    let handlers = TestHandlers::new().await;
    let context = SchedulerContext::build(config.clone(), handlers.registry.clone())
        .await
        .unwrap();
    let control = context.control();
    control
        .update_job_metadata(
            "news_sync",
            MetadataUpdate {
                display_name: Some("新闻同步".into()),
                description: None,
            },
        )
        .await
        .unwrap();
    control.pause_job("news_sync").await.unwrap();
    let health = control.health().await;
    assert!(health.is_healthy());
    assert_eq!(health.storage_backend, "sqlite");
    context.shutdown().await;

    // 重启后元数据覆盖静态配置，暂停状态不持久化
    let context = SchedulerContext::build(config, handlers.registry.clone())
        .await
        .unwrap();
    let control = context.control();
    let job = control.get_job("news_sync").await.unwrap();
    assert_eq!(job.display_name, "新闻同步");
    assert!(!job.paused);
    assert_eq!(
        control.job_action_history_count(Some("news_sync")).await.unwrap(),
        2
    );
    context.shutdown().await;
}

#[tokio::test]
async fn test_invalid_static_jobs_rejected_at_build() {
    let handlers = TestHandlers::new().await;

    let unknown_handler = memory_config(vec![JobDefinition::new(
        "a",
        TriggerSpec::interval(5),
        "does_not_exist",
    )]);
    assert!(matches!(
        SchedulerContext::build(unknown_handler, handlers.registry.clone()).await,
        Err(SchedulerError::HandlerNotFound { .. })
    ));

    let bad_cron = memory_config(vec![JobDefinition::new(
        "a",
        TriggerSpec::cron("not a cron"),
        "noop",
    )]);
    assert!(matches!(
        SchedulerContext::build(bad_cron, handlers.registry.clone()).await,
        Err(SchedulerError::InvalidCron { .. })
    ));

    let oversized_interval = memory_config(vec![JobDefinition::new(
        "a",
        TriggerSpec::interval(10_000_000_000_000_000),
        "noop",
    )]);
    assert!(matches!(
        SchedulerContext::build(oversized_interval, handlers.registry.clone()).await,
        Err(SchedulerError::InvalidTrigger(_))
    ));
}

#[tokio::test]
async fn test_register_job_at_runtime_and_start_once() {
    let (context, _handlers) = memory_context(vec![]).await;
    let view = context
        .register_job(
            JobDefinition::new("late_job", TriggerSpec::interval(60), "noop")
                .with_timezone("")
                .with_description("嵌入方注册"),
        )
        .await
        .unwrap();
    assert_eq!(view.timezone, "UTC");
    assert!(view.next_fire_time.is_some());
    assert_eq!(context.control().get_stats().await.jobs_total, 1);

    context.start().await.unwrap();
    assert!(matches!(
        context.start().await,
        Err(SchedulerError::Internal(_))
    ));
    context.shutdown().await;
}
