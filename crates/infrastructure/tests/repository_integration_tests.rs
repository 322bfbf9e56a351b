//! 仓储契约测试，SQLite和内存实现运行相同的场景

use anyhow::Result;
use chrono::{Duration, Utc};
use ingest_scheduler_core::models::*;
use ingest_scheduler_infrastructure::{DatabaseManager, Storage};

async fn backends() -> Result<Vec<(&'static str, Storage)>> {
    let database = DatabaseManager::in_memory().await?;
    Ok(vec![
        ("sqlite", Storage::from_database(database)),
        ("memory", Storage::in_memory()),
    ])
}

fn running_at(job_id: &str, minutes_ago: i64, is_manual: bool) -> ExecutionRecord {
    let mut record = ExecutionRecord::running(job_id, job_id, Utc::now(), is_manual);
    record.start_timestamp = Utc::now() - Duration::minutes(minutes_ago);
    record.scheduled_time = record.start_timestamp;
    record
}

#[tokio::test]
async fn test_create_get_and_filtered_listing() -> Result<()> {
    for (backend, storage) in backends().await? {
        let repo = storage.executions.clone();

        let a1 = repo.create(&running_at("news_sync", 30, false)).await?;
        let a2 = repo.create(&running_at("news_sync", 20, true)).await?;
        let b1 = repo.create(&running_at("quotes_sync", 10, false)).await?;
        assert!(a1.id > 0 && a2.id > a1.id && b1.id > a2.id, "{backend}");

        let fetched = repo.get_by_id(a2.id).await?.expect("record exists");
        assert_eq!(fetched.job_id, "news_sync");
        assert!(fetched.is_manual);
        assert_eq!(fetched.status, ExecutionStatus::Running);
        assert_eq!(fetched.start_timestamp, a2.start_timestamp);
        assert!(repo.get_by_id(9999).await?.is_none());

        // 按开始时间倒序
        let all = repo.list(&ExecutionFilter::default()).await?;
        let ids: Vec<i64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![b1.id, a2.id, a1.id], "{backend}");

        let news = repo.list(&ExecutionFilter::for_job("news_sync")).await?;
        assert_eq!(news.len(), 2);

        let manual = repo.list(&ExecutionFilter::default().manual(true)).await?;
        assert_eq!(manual.len(), 1);
        assert_eq!(manual[0].id, a2.id);

        let page = repo
            .list(&ExecutionFilter::default().paginate(1, 1))
            .await?;
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, a2.id, "{backend}");

        let filter = ExecutionFilter::for_job("news_sync").paginate(1, 0);
        assert_eq!(repo.count(&filter).await?, 2, "count ignores pagination");
        assert_eq!(
            repo.count(&ExecutionFilter::default().with_status(ExecutionStatus::Success))
                .await?,
            0
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_complete_if_running_is_conditional() -> Result<()> {
    for (backend, storage) in backends().await? {
        let repo = storage.executions.clone();
        let record = repo.create(&running_at("news_sync", 1, false)).await?;

        let done = ExecutionCompletion::success(Utc::now(), 60.0, Some("{\"rows\":3}".into()));
        assert!(repo.complete_if_running(record.id, &done).await?, "{backend}");

        let failed = ExecutionCompletion::failed(Utc::now(), 61.0, ZOMBIE_ERROR_MESSAGE, None);
        assert!(!repo.complete_if_running(record.id, &failed).await?, "{backend}");

        let stored = repo.get_by_id(record.id).await?.expect("record exists");
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert_eq!(stored.execution_time, Some(60.0));
        assert_eq!(stored.progress, Some(100));
        assert_eq!(stored.return_value.as_deref(), Some("{\"rows\":3}"));
        assert!(stored.error_message.is_none());

        assert!(!repo.complete_if_running(4242, &done).await?);
    }
    Ok(())
}

#[tokio::test]
async fn test_progress_and_cancel_flag() -> Result<()> {
    for (backend, storage) in backends().await? {
        let repo = storage.executions.clone();
        let record = repo.create(&running_at("batch", 0, false)).await?;

        let update = ProgressUpdate::percent(40)
            .with_message("处理中")
            .with_items(4, 10)
            .with_current_item("600519");
        let ack = repo.record_progress(record.id, &update).await?.expect("ack");
        assert!(ack.still_running && !ack.cancel_requested, "{backend}");

        assert!(repo.request_cancel(record.id).await?);
        let ack = repo
            .record_progress(record.id, &ProgressUpdate::percent(50))
            .await?
            .expect("ack");
        assert!(ack.cancel_requested, "{backend}");

        let stored = repo.get_by_id(record.id).await?.expect("record exists");
        assert_eq!(stored.progress, Some(50));
        // 未提供的字段保持原值
        assert_eq!(stored.progress_message.as_deref(), Some("处理中"));
        assert_eq!(stored.processed_items, Some(4));
        assert_eq!(stored.total_items, Some(10));
        assert_eq!(stored.current_item.as_deref(), Some("600519"));
        assert!(stored.cancel_requested);

        let cancelled = ExecutionCompletion::failed(Utc::now(), 1.0, CANCELLED_ERROR_MESSAGE, None);
        assert!(repo.complete_if_running(record.id, &cancelled).await?);

        // 终态记录不再接受进度，也不能再请求取消
        let ack = repo
            .record_progress(record.id, &ProgressUpdate::percent(90))
            .await?
            .expect("ack");
        assert!(!ack.still_running, "{backend}");
        let stored = repo.get_by_id(record.id).await?.expect("record exists");
        assert_eq!(stored.progress, Some(50));
        assert!(stored.is_cancelled());
        assert!(!repo.request_cancel(record.id).await?);

        assert!(repo
            .record_progress(777, &ProgressUpdate::percent(1))
            .await?
            .is_none());
    }
    Ok(())
}

#[tokio::test]
async fn test_delete_only_terminal_records() -> Result<()> {
    for (backend, storage) in backends().await? {
        let repo = storage.executions.clone();
        let running = repo.create(&running_at("news_sync", 0, false)).await?;
        let missed = repo
            .create(&ExecutionRecord::missed("news_sync", "news_sync", Utc::now()))
            .await?;

        assert!(!repo.delete_if_terminal(running.id).await?, "{backend}");
        assert!(repo.get_by_id(running.id).await?.is_some());

        assert!(repo.delete_if_terminal(missed.id).await?, "{backend}");
        assert!(repo.get_by_id(missed.id).await?.is_none());
        assert!(!repo.delete_if_terminal(missed.id).await?);
    }
    Ok(())
}

#[tokio::test]
async fn test_running_lookups_for_reconciliation_and_reaping() -> Result<()> {
    for (backend, storage) in backends().await? {
        let repo = storage.executions.clone();
        let old = repo.create(&running_at("news_sync", 45, false)).await?;
        let older = repo.create(&running_at("quotes_sync", 60, false)).await?;
        let fresh = repo.create(&running_at("news_sync", 2, false)).await?;

        let window_start = Utc::now() - Duration::minutes(5);
        let latest = repo
            .find_latest_running("news_sync", window_start)
            .await?
            .expect("fresh record inside window");
        assert_eq!(latest.id, fresh.id, "{backend}");
        assert!(repo
            .find_latest_running("quotes_sync", window_start)
            .await?
            .is_none());

        let threshold = Utc::now() - Duration::minutes(30);
        let stale = repo.find_stale_running(threshold, 100).await?;
        let ids: Vec<i64> = stale.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older.id, old.id], "{backend}");

        let limited = repo.find_stale_running(threshold, 1).await?;
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, older.id);
    }
    Ok(())
}

#[tokio::test]
async fn test_job_stats_and_summary() -> Result<()> {
    for (backend, storage) in backends().await? {
        let repo = storage.executions.clone();

        for seconds in [2.0, 4.0] {
            let record = repo.create(&running_at("news_sync", 10, false)).await?;
            let done = ExecutionCompletion::success(Utc::now(), seconds, None);
            repo.complete_if_running(record.id, &done).await?;
        }
        let failed = repo.create(&running_at("news_sync", 5, false)).await?;
        repo.complete_if_running(
            failed.id,
            &ExecutionCompletion::failed(Utc::now(), 9.0, "boom", Some("trace".into())),
        )
        .await?;
        repo.create(&ExecutionRecord::missed("news_sync", "news_sync", Utc::now()))
            .await?;
        let latest = repo.create(&running_at("news_sync", 0, true)).await?;
        repo.create(&running_at("quotes_sync", 0, false)).await?;

        let stats = repo.job_stats("news_sync").await?;
        assert_eq!(stats.total, 5, "{backend}");
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.missed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.avg_execution_time, Some(3.0));
        let last = stats.last_execution.expect("last execution");
        assert_eq!(last.id, latest.id, "{backend}");
        assert_eq!(last.status, ExecutionStatus::Running);

        let empty = repo.job_stats("unknown").await?;
        assert_eq!(empty.total, 0);
        assert!(empty.avg_execution_time.is_none());
        assert!(empty.last_execution.is_none());

        let summary = repo.status_summary().await?;
        assert_eq!(summary.total(), 6, "{backend}");
        assert_eq!(summary.running, 2);
    }
    Ok(())
}

#[tokio::test]
async fn test_action_log_history() -> Result<()> {
    for (backend, storage) in backends().await? {
        let logs = storage.action_logs.clone();

        logs.append(&JobActionLog::new("news_sync", JobAction::Pause, ActionStatus::Success))
            .await?;
        logs.append(
            &JobActionLog::new("", JobAction::CancelExecution, ActionStatus::Failed)
                .with_execution(42)
                .with_message(Some("执行记录未找到: 42".into())),
        )
        .await?;
        let last = logs
            .append(&JobActionLog::new("news_sync", JobAction::Resume, ActionStatus::Success))
            .await?;
        assert!(last.id > 0);

        assert_eq!(logs.count(None).await?, 3, "{backend}");
        assert_eq!(logs.count(Some("news_sync")).await?, 2);

        let history = logs.list(Some("news_sync"), 10, 0).await?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, JobAction::Resume, "{backend}");
        assert_eq!(history[1].action, JobAction::Pause);

        let all = logs.list(None, 10, 0).await?;
        let orphan = all
            .iter()
            .find(|e| e.execution_id == Some(42))
            .expect("orphan entry");
        assert_eq!(orphan.job_id, "");
        assert_eq!(orphan.status, ActionStatus::Failed);

        assert_eq!(logs.list(None, 1, 1).await?.len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_metadata_upsert_keeps_unset_fields() -> Result<()> {
    for (backend, storage) in backends().await? {
        let metadata = storage.metadata.clone();

        metadata
            .upsert(&JobMetadata {
                job_id: "news_sync".into(),
                display_name: Some("新闻同步".into()),
                description: Some("每30分钟".into()),
                updated_at: Utc::now(),
            })
            .await?;
        let merged = metadata
            .upsert(&JobMetadata {
                job_id: "news_sync".into(),
                display_name: None,
                description: Some("每小时".into()),
                updated_at: Utc::now(),
            })
            .await?;
        assert_eq!(merged.display_name.as_deref(), Some("新闻同步"), "{backend}");
        assert_eq!(merged.description.as_deref(), Some("每小时"));

        let stored = metadata.get("news_sync").await?.expect("metadata");
        assert_eq!(stored, merged);
        assert!(metadata.get("other").await?.is_none());
        assert_eq!(metadata.list().await?.len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_sqlite_file_storage_persists_across_connections() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = ingest_scheduler_core::config::DatabaseConfig {
        url: format!("sqlite:{}", dir.path().join("ledger.db").display()),
        ..Default::default()
    };

    let storage = Storage::connect(&config).await?;
    assert_eq!(storage.backend(), "sqlite");
    let created = storage
        .executions
        .create(&running_at("news_sync", 0, false))
        .await?;
    storage.close().await;

    let reopened = Storage::connect(&config).await?;
    let fetched = reopened.executions.get_by_id(created.id).await?;
    assert!(fetched.is_some());
    reopened.health_check().await?;
    Ok(())
}
