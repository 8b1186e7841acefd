//! 命令行公共逻辑 - 加载配置、初始化日志、执行同步并输出进度

use crate::config::AppConfig;
use crate::core::{Direction, ScanConfig, SyncConfig, SyncEngine, SyncEvent, SyncReport};
use crate::error::SyncError;
use crate::logging::{get_log_dir, init_logging};
use crate::storage::create_store;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing::error;

/// 全部成功
pub const EXIT_OK: u8 = 0;
/// 致命错误，或有单项传输失败
pub const EXIT_FAILURE: u8 = 1;

/// 执行一次备份或恢复
///
/// `config_path` 为空时按 `BUCKETSYNC_CONFIG` 或默认位置加载配置。
pub async fn run(
    direction: Direction,
    local_dir: &Path,
    bucket: &str,
    config_path: Option<PathBuf>,
) -> ExitCode {
    let config = match config_path {
        Some(path) => AppConfig::load(&path),
        None => AppConfig::load_default(),
    };
    init_logging(&config.log, &get_log_dir());

    let store = match create_store(&config, bucket).await {
        Ok(store) => store,
        Err(e) => {
            error!("初始化存储失败: {:#}", e);
            println!("Error in connecting to the bucket");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let engine = SyncEngine::with_config(
        store,
        bucket,
        SyncConfig {
            chunk_size: config.sync.chunk_size(),
            scan_config: ScanConfig {
                exclude_patterns: config.sync.exclude_patterns.clone(),
            },
            base_dir: PathBuf::from("."),
        },
    );

    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(direction, bucket.to_string(), rx));

    let result = match direction {
        Direction::Upload => engine.backup(local_dir, Some(tx)).await,
        Direction::Download => engine.restore(local_dir, Some(tx)).await,
    };
    // 发送端随 backup/restore 返回而释放，打印任务会自然结束
    let _ = printer.await;

    report_result(direction, &result);
    ExitCode::from(exit_status(&result))
}

async fn print_events(direction: Direction, bucket: String, mut rx: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = rx.recv().await {
        if let Some(text) = render_event(direction, &bucket, &event) {
            println!("{}", text);
        }
    }
}

/// 事件对应的输出文本，`None` 表示不输出
pub fn render_event(direction: Direction, bucket: &str, event: &SyncEvent) -> Option<String> {
    match (direction, event) {
        (_, SyncEvent::BucketMissing(name)) => {
            Some(format!("No such bucket!\ncreating bucket.. {}", name))
        }
        (_, SyncEvent::BucketCreated(_)) => Some("bucket created".to_string()),
        (Direction::Upload, SyncEvent::DirectoriesStarted) => {
            Some(format!("----Following directories are created in {}", bucket))
        }
        (Direction::Upload, SyncEvent::DirectoryCreated(name)) => Some(name.clone()),
        (Direction::Download, SyncEvent::DirectoriesStarted | SyncEvent::DirectoryCreated(_)) => {
            None
        }
        (Direction::Upload, SyncEvent::FilesStarted) => {
            Some(format!("----Following files are uploaded to {}", bucket))
        }
        (Direction::Download, SyncEvent::FilesStarted) => {
            Some(format!("--Following files were downloaded from {}", bucket))
        }
        (_, SyncEvent::FileTransferred(path)) => Some(path.clone()),
        // 失败已经以 warn 级别写入日志
        (_, SyncEvent::Failed { .. }) => None,
    }
}

fn report_result(direction: Direction, result: &Result<SyncReport, SyncError>) {
    match result {
        Ok(report) => {
            if direction == Direction::Download {
                println!("--Restore completed--");
            }
            if !report.is_success() {
                eprintln!(
                    "{} item(s) failed:",
                    report.files_failed + report.directories_failed
                );
                for line in &report.errors {
                    eprintln!("  {}", line);
                }
            }
        }
        Err(e) => {
            error!("{}", e);
            if matches!(e, SyncError::BucketCreate { .. }) {
                println!("Bucket creation fail");
            }
            println!("{}", e);
        }
    }
}

/// 进程退出码
pub fn exit_status(result: &Result<SyncReport, SyncError>) -> u8 {
    match result {
        Ok(report) if report.is_success() => EXIT_OK,
        _ => EXIT_FAILURE,
    }
}
