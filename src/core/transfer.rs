//! 传输执行 - 逐项上传/下载，单项失败只记录不中断

use crate::core::diff::DirectorySet;
use crate::storage::RemoteStore;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

/// 单项传输结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    Failed(String),
}

impl TransferOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Succeeded)
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Succeeded => write!(f, "ok"),
            TransferOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

impl<E: fmt::Display> From<Result<(), E>> for TransferOutcome {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => TransferOutcome::Succeeded,
            Err(e) => TransferOutcome::Failed(format!("{:#}", e)),
        }
    }
}

/// 传输执行器
pub struct TransferExecutor<'a> {
    store: &'a dyn RemoteStore,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self { store }
    }

    /// 在远端为每个目录创建零字节标记
    pub async fn create_directory_markers(
        &self,
        names: &DirectorySet,
    ) -> Vec<(String, TransferOutcome)> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let outcome: TransferOutcome = self.store.put_directory_marker(name).await.into();
            if let TransferOutcome::Failed(ref reason) = outcome {
                warn!("创建目录标记失败 {}: {}", name, reason);
            }
            results.push((name.clone(), outcome));
        }
        results
    }

    /// 在本地 root 下创建目录（已存在不报错）
    pub async fn create_local_directories(
        root: &Path,
        names: &DirectorySet,
    ) -> Vec<(String, TransferOutcome)> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            let outcome: TransferOutcome = tokio::fs::create_dir_all(root.join(name)).await.into();
            if let TransferOutcome::Failed(ref reason) = outcome {
                warn!("创建本地目录失败 {}: {}", name, reason);
            }
            results.push((name.clone(), outcome));
        }
        results
    }

    /// 上传单个文件
    pub async fn upload(&self, local_path: &Path, key: &str) -> TransferOutcome {
        debug!("上传 {} -> {}/{}", local_path.display(), self.store.name(), key);
        let outcome: TransferOutcome = self.store.upload_file(local_path, key).await.into();
        if let TransferOutcome::Failed(ref reason) = outcome {
            warn!("上传失败 {}: {}", key, reason);
        }
        outcome
    }

    /// 下载单个文件
    pub async fn download(&self, key: &str, local_path: &Path) -> TransferOutcome {
        debug!("下载 {}/{} -> {}", self.store.name(), key, local_path.display());
        let outcome: TransferOutcome = self.store.download_file(key, local_path).await.into();
        if let TransferOutcome::Failed(ref reason) = outcome {
            warn!("下载失败 {}: {}", key, reason);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStore;

    #[tokio::test]
    async fn test_failed_upload_is_reported_not_raised() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path(), "bucket", 8);
        let executor = TransferExecutor::new(&store);

        let outcome = executor.upload(&root.path().join("does-not-exist"), "k").await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_local_directories_are_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let names: DirectorySet = ["a".to_string(), "a/b".to_string()].into_iter().collect();

        let first = TransferExecutor::create_local_directories(root.path(), &names).await;
        let second = TransferExecutor::create_local_directories(root.path(), &names).await;

        assert!(first.iter().chain(second.iter()).all(|(_, o)| o.is_success()));
        assert!(root.path().join("a/b").is_dir());
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalStore::new(root.path(), "bucket", 8);
        store.create_bucket().await.unwrap();
        let executor = TransferExecutor::new(&store);

        let src = root.path().join("src");
        std::fs::write(&src, b"data").unwrap();
        assert!(executor.upload(&src, "dir/file").await.is_success());

        let dest = root.path().join("restored/dir/file");
        assert!(executor.download("dir/file", &dest).await.is_success());
        assert_eq!(std::fs::read(dest).unwrap(), b"data");
    }
}
