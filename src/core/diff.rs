//! 差异计算 - 决定哪些目录需要创建、哪些文件需要传输
//!
//! 两个方向都只做加法：一侧删除的文件永远不会在另一侧被删除。

use crate::core::fingerprint::Fingerprint;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

/// 目录标记集合（相对路径，不带结尾分隔符）
pub type DirectorySet = BTreeSet<String>;

/// 相对路径 -> 指纹
pub type FileIndex = BTreeMap<String, Fingerprint>;

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// 单个待传输文件
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Transfer {
    pub path: String,
    pub direction: Direction,
}

/// 传输计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    /// 需要创建的目录
    pub directories: DirectorySet,
    /// 需要传输的文件（按路径排序）
    pub transfers: Vec<Transfer>,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.transfers.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.transfers.iter().map(|t| t.path.as_str())
    }
}

/// 文件是否需要传输：目标侧不存在，或标签与源侧不同
pub fn needs_transfer(source: &Fingerprint, destination: Option<&Fingerprint>) -> bool {
    match destination {
        None => true,
        Some(dest) => {
            if dest != source {
                if let (Some(a), Some(b)) = (source.part_count(), dest.part_count()) {
                    if a != b {
                        debug!("分段数不同 ({} vs {})，可能是上传时使用了不同的分段大小", a, b);
                    }
                }
                true
            } else {
                false
            }
        }
    }
}

/// 备份方向的差异计算
///
/// 目录：本地存在而远端没有的目录。文件：远端缺失或标签不同的本地文件。
pub fn plan_backup(
    local_dirs: &DirectorySet,
    local_files: &FileIndex,
    remote_dirs: &DirectorySet,
    remote_files: &FileIndex,
) -> TransferPlan {
    let directories = local_dirs.difference(remote_dirs).cloned().collect();

    let transfers = local_files
        .iter()
        .filter(|(path, local)| needs_transfer(local, remote_files.get(path.as_str())))
        .map(|(path, _)| Transfer {
            path: path.clone(),
            direction: Direction::Upload,
        })
        .collect();

    TransferPlan {
        directories,
        transfers,
    }
}

/// 恢复方向的目录计划：远端列出的每个目录标记都创建（本地创建是幂等的）
pub fn plan_restore_directories(remote_dirs: &DirectorySet) -> DirectorySet {
    remote_dirs.clone()
}

/// 恢复方向的单文件判定：远端当前标签与本地指纹不同就下载
///
/// 本地文件不存在时指纹为哨兵值，必然不同。
pub fn needs_download(remote_tag: &Fingerprint, local: &Fingerprint) -> bool {
    needs_transfer(remote_tag, Some(local))
}
