use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 导致一次运行中止的错误
///
/// 单个文件的传输失败不在此列，它们只记录在 [`crate::SyncReport`] 中。
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// 本地目录不存在或不是目录
    #[error("Directory not found or is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// bucket 不存在（恢复时不会自动创建）
    #[error("No such bucket: {0}")]
    BucketMissing(String),

    /// 无法访问 bucket
    #[error("Error in connecting to the bucket {bucket}: {source}")]
    BucketAccess { bucket: String, source: BoxError },

    /// bucket 创建失败
    #[error("Error in connecting or creating the bucket {bucket}: {source}")]
    BucketCreate { bucket: String, source: BoxError },

    /// 列出远端对象失败
    #[error("Failed to list s3://{bucket}: {source}")]
    Listing { bucket: String, source: BoxError },

    /// 本地扫描失败
    #[error("Failed to scan {}: {source}", .path.display())]
    Scan { path: PathBuf, source: BoxError },
}
