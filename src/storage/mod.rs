pub mod local;
pub mod s3;

use crate::config::{AppConfig, StoreBackend};
use crate::core::Fingerprint;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use local::LocalStore;
pub use s3::S3Store;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远端对象（列表中的一项）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// 对象 key，目录标记以 `/` 结尾
    pub key: String,
    /// 存储端报告的完整性标签（目录标记可能没有）
    pub etag: Option<Fingerprint>,
}

impl RemoteObject {
    pub fn is_dir_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// 对象存储抽象接口（一个 bucket）
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// bucket 是否存在且可访问
    async fn bucket_exists(&self) -> Result<bool>;

    /// 创建 bucket
    async fn create_bucket(&self) -> Result<()>;

    /// 列出 bucket 中的全部对象（遍历所有分页）
    async fn list_objects(&self) -> Result<Vec<RemoteObject>>;

    /// 查询单个对象当前的标签，对象不存在时返回 None
    async fn head_tag(&self, key: &str) -> Result<Option<Fingerprint>>;

    /// 创建目录标记（零字节、key 以 `/` 结尾），重复创建不报错
    async fn put_directory_marker(&self, name: &str) -> Result<()>;

    /// 上传单个本地文件
    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()>;

    /// 下载单个对象到本地文件
    async fn download_file(&self, key: &str, local_path: &Path) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 规范化目录标记的 key：去掉首尾分隔符后补一个 `/`
pub fn marker_key(name: &str) -> String {
    format!("{}/", name.trim_matches('/'))
}

/// 根据配置创建存储实例
pub async fn create_store(config: &AppConfig, bucket: &str) -> Result<Arc<dyn RemoteStore>> {
    let chunk_size = config.sync.chunk_size();
    match config.store.backend {
        StoreBackend::S3 => {
            let region = config.store.resolved_region();
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, region);
            Ok(Arc::new(
                S3Store::new(bucket, &region, config.store.endpoint.clone(), chunk_size).await?,
            ) as Arc<dyn RemoteStore>)
        }
        StoreBackend::Local => {
            let root = config
                .store
                .local_root
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("Local store requires localRoot"))?;
            tracing::info!("初始化本地存储: root={}, bucket={}", root.display(), bucket);
            Ok(Arc::new(LocalStore::new(root, bucket, chunk_size)) as Arc<dyn RemoteStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_key() {
        assert_eq!(marker_key("a/b"), "a/b/");
        assert_eq!(marker_key("a/b/"), "a/b/");
    }

    #[test]
    fn test_dir_marker_detection() {
        let dir = RemoteObject { key: "a/".into(), etag: None };
        let file = RemoteObject { key: "a/x".into(), etag: None };
        assert!(dir.is_dir_marker());
        assert!(!file.is_dir_marker());
    }
}
