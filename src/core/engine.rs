use crate::core::diff::{
    needs_download, plan_backup, plan_restore_directories, Direction, DirectorySet,
};
use crate::core::fingerprint::{compute_fingerprint_async, Fingerprint, DEFAULT_CHUNK_SIZE};
use crate::core::remote::RemoteTreeLister;
use crate::core::scanner::{LocalTreeScanner, ScanConfig};
use crate::core::transfer::{TransferExecutor, TransferOutcome};
use crate::error::SyncError;
use crate::storage::RemoteStore;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 指纹分块大小（字节）
    pub chunk_size: usize,
    /// 扫描配置
    pub scan_config: ScanConfig,
    /// 本地路径的基准目录，远端 key 相对于它计算
    pub base_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_config: ScanConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

/// 运行过程中的事件，供命令行逐条输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// bucket 不存在，即将创建
    BucketMissing(String),
    /// bucket 已创建
    BucketCreated(String),
    /// 开始创建目录
    DirectoriesStarted,
    DirectoryCreated(String),
    /// 开始传输文件
    FilesStarted,
    FileTransferred(String),
    Failed { path: String, reason: String },
}

/// 同步报告
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub direction: String,
    pub bucket: String,
    pub start_time: i64,
    pub end_time: i64,
    pub directories_created: u32,
    pub directories_failed: u32,
    pub files_considered: u32,
    pub files_transferred: u32,
    pub files_skipped: u32,
    pub files_failed: u32,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(direction: Direction, bucket: &str) -> Self {
        Self {
            direction: direction.to_string(),
            bucket: bucket.to_string(),
            start_time: chrono::Utc::now().timestamp(),
            end_time: 0,
            directories_created: 0,
            directories_failed: 0,
            files_considered: 0,
            files_transferred: 0,
            files_skipped: 0,
            files_failed: 0,
            errors: Vec::new(),
        }
    }

    /// 所有单项操作都成功
    pub fn is_success(&self) -> bool {
        self.directories_failed == 0 && self.files_failed == 0
    }

    pub fn duration_secs(&self) -> i64 {
        (self.end_time - self.start_time).max(0)
    }

    fn finish(mut self) -> Self {
        self.end_time = chrono::Utc::now().timestamp();
        info!(
            "{} 完成: 目录 {} 个, 传输 {} 个, 跳过 {} 个, 失败 {} 个, 耗时 {}s",
            self.direction,
            self.directories_created,
            self.files_transferred,
            self.files_skipped,
            self.files_failed + self.directories_failed,
            self.duration_secs()
        );
        self
    }
}

/// 同步引擎
///
/// 一次只处理一项：先枚举两侧，再计算差异，最后逐个执行。单项失败只记录在
/// 报告中，不会中断后续项。
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    bucket: String,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn RemoteStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            config: SyncConfig::default(),
        }
    }

    pub fn with_config(
        store: Arc<dyn RemoteStore>,
        bucket: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            config,
        }
    }

    /// 备份：把本地目录中新增或修改的文件上传到 bucket
    pub async fn backup(
        &self,
        local_dir: &Path,
        progress_tx: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncReport, SyncError> {
        let root = self.config.base_dir.join(local_dir);
        if !root.is_dir() {
            return Err(SyncError::NotADirectory(local_dir.to_path_buf()));
        }

        info!("开始备份: {} -> {}", local_dir.display(), self.store.name());
        self.ensure_bucket(&progress_tx).await?;

        let remote = RemoteTreeLister::new(self.store.as_ref())
            .list()
            .await
            .map_err(|e| SyncError::Listing {
                bucket: self.bucket.clone(),
                source: e.into(),
            })?;

        let scanner = LocalTreeScanner::with_config(
            self.config.base_dir.clone(),
            self.config.chunk_size,
            self.config.scan_config.clone(),
        );
        let local = scanner.scan(local_dir).await.map_err(|e| SyncError::Scan {
            path: local_dir.to_path_buf(),
            source: e.into(),
        })?;

        let plan = plan_backup(
            &local.directories,
            &local.files,
            &remote.directories,
            &remote.files,
        );
        debug!(
            "备份计划: {} 个目录, {} 个文件",
            plan.directories.len(),
            plan.transfers.len()
        );

        let mut report = SyncReport::new(Direction::Upload, &self.bucket);
        report.files_considered = local.files.len() as u32;
        report.files_skipped = local.files.len().saturating_sub(plan.transfers.len()) as u32;

        let executor = TransferExecutor::new(self.store.as_ref());

        send_event(&progress_tx, SyncEvent::DirectoriesStarted).await;
        for (name, outcome) in executor.create_directory_markers(&plan.directories).await {
            self.record_directory(&mut report, &progress_tx, name, outcome).await;
        }

        send_event(&progress_tx, SyncEvent::FilesStarted).await;
        for transfer in &plan.transfers {
            let local_path = local.local_path(&transfer.path);
            let outcome = executor.upload(&local_path, &transfer.path).await;
            self.record_file(&mut report, &progress_tx, &transfer.path, outcome)
                .await;
        }

        Ok(report.finish())
    }

    /// 恢复：把 bucket 中的对象下载到本地目录，内容一致的文件跳过
    pub async fn restore(
        &self,
        local_dir: &Path,
        progress_tx: Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<SyncReport, SyncError> {
        match self.store.bucket_exists().await {
            Ok(true) => {}
            Ok(false) => return Err(SyncError::BucketMissing(self.bucket.clone())),
            Err(e) => {
                return Err(SyncError::BucketAccess {
                    bucket: self.bucket.clone(),
                    source: e.into(),
                })
            }
        }

        info!("开始恢复: {} -> {}", self.store.name(), local_dir.display());
        let root = self.config.base_dir.join(local_dir);
        let lister = RemoteTreeLister::new(self.store.as_ref());
        let remote = lister.list().await.map_err(|e| SyncError::Listing {
            bucket: self.bucket.clone(),
            source: e.into(),
        })?;

        let mut report = SyncReport::new(Direction::Download, &self.bucket);
        report.files_considered = remote.files.len() as u32;

        send_event(&progress_tx, SyncEvent::DirectoriesStarted).await;
        let directories: DirectorySet = plan_restore_directories(&remote.directories)
            .into_iter()
            .filter(|name| {
                let safe = is_safe_relative(name);
                if !safe {
                    warn!("跳过不安全的目录标记: {}", name);
                }
                safe
            })
            .collect();
        for (name, outcome) in TransferExecutor::create_local_directories(&root, &directories).await
        {
            self.record_directory(&mut report, &progress_tx, name, outcome).await;
        }

        send_event(&progress_tx, SyncEvent::FilesStarted).await;
        let executor = TransferExecutor::new(self.store.as_ref());
        for key in remote.files.keys() {
            if !is_safe_relative(key) {
                warn!("跳过不安全的对象 key: {}", key);
                report.files_skipped += 1;
                continue;
            }

            // 逐个查询最新标签，而不是复用列表中的值
            let remote_tag = match lister.current_tag(key).await {
                Ok(Some(tag)) => tag,
                Ok(None) => {
                    warn!("对象在列出后已被删除: {}", key);
                    report.files_skipped += 1;
                    continue;
                }
                Err(e) => {
                    let outcome = TransferOutcome::Failed(format!("head 失败: {:#}", e));
                    self.record_file(&mut report, &progress_tx, key, outcome).await;
                    continue;
                }
            };

            let local_path = root.join(key);
            let local = compute_fingerprint_async(local_path.clone(), self.config.chunk_size)
                .await
                .unwrap_or_else(|e| {
                    warn!("无法读取本地文件 {}: {}，将重新下载", local_path.display(), e);
                    Fingerprint::NotFound
                });

            if !needs_download(&remote_tag, &local) {
                debug!("跳过（内容相同）: {}", key);
                report.files_skipped += 1;
                continue;
            }

            let outcome = executor.download(key, &local_path).await;
            self.record_file(&mut report, &progress_tx, key, outcome).await;
        }

        Ok(report.finish())
    }

    /// 检查 bucket，不存在时创建
    async fn ensure_bucket(
        &self,
        progress_tx: &Option<mpsc::Sender<SyncEvent>>,
    ) -> Result<(), SyncError> {
        match self.store.bucket_exists().await {
            Ok(true) => Ok(()),
            Ok(false) => {
                send_event(progress_tx, SyncEvent::BucketMissing(self.bucket.clone())).await;
                self.store
                    .create_bucket()
                    .await
                    .map_err(|e| SyncError::BucketCreate {
                        bucket: self.bucket.clone(),
                        source: e.into(),
                    })?;
                info!("bucket 已创建: {}", self.bucket);
                send_event(progress_tx, SyncEvent::BucketCreated(self.bucket.clone())).await;
                Ok(())
            }
            Err(e) => Err(SyncError::BucketAccess {
                bucket: self.bucket.clone(),
                source: e.into(),
            }),
        }
    }

    async fn record_directory(
        &self,
        report: &mut SyncReport,
        progress_tx: &Option<mpsc::Sender<SyncEvent>>,
        name: String,
        outcome: TransferOutcome,
    ) {
        match outcome {
            TransferOutcome::Succeeded => {
                report.directories_created += 1;
                send_event(progress_tx, SyncEvent::DirectoryCreated(name)).await;
            }
            TransferOutcome::Failed(reason) => {
                report.directories_failed += 1;
                report.errors.push(format!("{}: {}", name, reason));
                send_event(progress_tx, SyncEvent::Failed { path: name, reason }).await;
            }
        }
    }

    async fn record_file(
        &self,
        report: &mut SyncReport,
        progress_tx: &Option<mpsc::Sender<SyncEvent>>,
        path: &str,
        outcome: TransferOutcome,
    ) {
        match outcome {
            TransferOutcome::Succeeded => {
                report.files_transferred += 1;
                send_event(progress_tx, SyncEvent::FileTransferred(path.to_string())).await;
            }
            TransferOutcome::Failed(reason) => {
                report.files_failed += 1;
                report.errors.push(format!("{}: {}", path, reason));
                send_event(
                    progress_tx,
                    SyncEvent::Failed {
                        path: path.to_string(),
                        reason,
                    },
                )
                .await;
            }
        }
    }
}

async fn send_event(tx: &Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event).await;
    }
}

/// 远端 key 映射到本地时不能逃出目标目录
fn is_safe_relative(key: &str) -> bool {
    let path = Path::new(key);
    !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
