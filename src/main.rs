use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};

use ingest_scheduler::{
    telemetry::{init_logging, init_metrics},
    Application, ShutdownManager,
};
use ingest_scheduler_core::config::{AppConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("ingest-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("数据接入后台的定时任务调度与执行追踪")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，未指定时依次查找默认位置"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("只校验配置并退出")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let config = AppConfig::load(config_path.map(String::as_str))
        .with_context(|| format!("加载配置失败: {}", config_path.map_or("默认位置", |p| p)))?;

    if matches.get_flag("check") {
        println!(
            "配置校验通过: 存储 {}, 静态任务 {} 个",
            config.database.url,
            config.jobs.len()
        );
        return Ok(());
    }

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = match matches.get_one::<String>("log-format") {
        Some(format) => format.parse::<LogFormat>().map_err(anyhow::Error::msg)?,
        None => config.observability.log_format,
    };
    init_logging(&log_level, log_format)?;

    info!("启动数据接入调度器 {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    shutdown_manager.wait_for_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    if let Err(e) = app_handle.await {
        error!("应用关闭时发生错误: {e}");
    }

    info!("数据接入调度器已退出");
    Ok(())
}
