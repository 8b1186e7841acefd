use super::{RemoteObject, RemoteStore};
use crate::core::fingerprint::{compute_fingerprint, compute_fingerprint_async, Fingerprint};
use anyhow::Result;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// 以本地目录模拟的 bucket
///
/// `<root>/<bucket>` 即 bucket，目录即目录标记，文件标签按与 S3 相同的算法计算。
pub struct LocalStore {
    bucket_path: PathBuf,
    chunk_size: usize,
    name: String,
}

impl LocalStore {
    pub fn new(root: &Path, bucket: &str, chunk_size: usize) -> Self {
        let bucket_path = root.join(bucket);
        let name = format!("local:{}", bucket_path.display());
        Self {
            bucket_path,
            chunk_size,
            name,
        }
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        let key = key.trim_start_matches('/').trim_start_matches('\\');
        if key.is_empty() {
            self.bucket_path.clone()
        } else {
            self.bucket_path.join(key)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }
}

/// 与目标文件同目录的临时文件路径
pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// 复制到临时文件后原子重命名，失败时删除临时文件
async fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp_path = temp_path_for(to);
    let result: std::io::Result<()> = async {
        fs::copy(from, &temp_path).await?;
        fs::rename(&temp_path, to).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    Ok(result?)
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn bucket_exists(&self) -> Result<bool> {
        match fs::metadata(&self.bucket_path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        fs::create_dir_all(&self.bucket_path).await?;
        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<RemoteObject>> {
        let base = self.bucket_path.clone();
        let chunk_size = self.chunk_size;

        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || -> Result<Vec<RemoteObject>> {
            let mut objects = Vec::new();
            for entry in WalkDir::new(&base).min_depth(1).follow_links(false) {
                let entry = entry?;
                let Some(relative) = entry.path().strip_prefix(&base).ok().and_then(Path::to_str)
                else {
                    continue;
                };
                let key = Self::normalize_path(relative);

                if entry.file_type().is_dir() {
                    objects.push(RemoteObject {
                        key: format!("{}/", key),
                        etag: None,
                    });
                } else {
                    let etag = compute_fingerprint(entry.path(), chunk_size)?;
                    objects.push(RemoteObject {
                        key,
                        etag: Some(etag),
                    });
                }
            }
            Ok(objects)
        })
        .await?
    }

    async fn head_tag(&self, key: &str) -> Result<Option<Fingerprint>> {
        let path = self.resolve_path(key);
        if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
            return Ok(None);
        }
        match compute_fingerprint_async(path, self.chunk_size).await? {
            Fingerprint::NotFound => Ok(None),
            tag => Ok(Some(tag)),
        }
    }

    async fn put_directory_marker(&self, name: &str) -> Result<()> {
        fs::create_dir_all(self.resolve_path(name)).await?;
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()> {
        copy_atomic(local_path, &self.resolve_path(key)).await
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<()> {
        copy_atomic(&self.resolve_path(key), local_path).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(root: &Path) -> LocalStore {
        LocalStore::new(root, "bucket", 4)
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());

        assert!(!store.bucket_exists().await.unwrap());
        store.create_bucket().await.unwrap();
        assert!(store.bucket_exists().await.unwrap());
        assert!(store.list_objects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_separates_markers_and_files() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.create_bucket().await.unwrap();

        store.put_directory_marker("a/b").await.unwrap();
        let src = root.path().join("src.txt");
        std::fs::write(&src, b"hello").unwrap();
        store.upload_file(&src, "a/x").await.unwrap();

        let mut objects = store.list_objects().await.unwrap();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        let keys: Vec<_> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a/", "a/b/", "a/x"]);

        let file = objects.iter().find(|o| o.key == "a/x").unwrap();
        assert_eq!(file.etag, Some(compute_fingerprint(&src, 4).unwrap()));
        assert!(objects.iter().filter(|o| o.is_dir_marker()).all(|o| o.etag.is_none()));
    }

    #[tokio::test]
    async fn test_head_tag() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.create_bucket().await.unwrap();

        assert_eq!(store.head_tag("missing").await.unwrap(), None);

        let src = root.path().join("src.txt");
        std::fs::write(&src, b"abcdefgh!").unwrap();
        store.upload_file(&src, "k").await.unwrap();
        let tag = store.head_tag("k").await.unwrap().unwrap();
        assert_eq!(tag.part_count(), Some(3));
    }

    #[tokio::test]
    async fn test_download_creates_parents() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.create_bucket().await.unwrap();

        let src = root.path().join("src.txt");
        std::fs::write(&src, b"payload").unwrap();
        store.upload_file(&src, "deep/k").await.unwrap();

        let dest = root.path().join("out/nested/k");
        store.download_file("deep/k", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert!(!temp_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_temp_file() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.create_bucket().await.unwrap();

        let src = root.path().join("src.txt");
        std::fs::write(&src, b"payload").unwrap();
        store.upload_file(&src, "k").await.unwrap();

        // 目标是非空目录，重命名必然失败
        let dest = root.path().join("out/k");
        std::fs::create_dir_all(dest.join("child")).unwrap();

        assert!(store.download_file("k", &dest).await.is_err());
        assert!(!temp_path_for(&dest).exists());
    }

    #[tokio::test]
    async fn test_marker_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        store.create_bucket().await.unwrap();

        store.put_directory_marker("a").await.unwrap();
        store.put_directory_marker("a").await.unwrap();
        assert_eq!(store.list_objects().await.unwrap().len(), 1);
    }
}
