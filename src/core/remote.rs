use crate::core::diff::{DirectorySet, FileIndex};
use crate::core::fingerprint::Fingerprint;
use crate::storage::{RemoteObject, RemoteStore};
use anyhow::Result;
use tracing::{debug, info, warn};

/// 远端目录树
#[derive(Debug, Clone, Default)]
pub struct RemoteTree {
    /// 目录标记（已去掉结尾的 `/`）
    pub directories: DirectorySet,
    /// key -> 存储端标签
    pub files: FileIndex,
}

/// 远端列表器
pub struct RemoteTreeLister<'a> {
    store: &'a dyn RemoteStore,
}

impl<'a> RemoteTreeLister<'a> {
    pub fn new(store: &'a dyn RemoteStore) -> Self {
        Self { store }
    }

    /// 列出整个 bucket 并区分目录标记与文件
    pub async fn list(&self) -> Result<RemoteTree> {
        info!("开始列出远端对象: {}", self.store.name());
        let objects = self.store.list_objects().await?;
        let tree = partition(objects);
        info!(
            "远端列表完成: {} 个文件, {} 个目录标记",
            tree.files.len(),
            tree.directories.len()
        );
        Ok(tree)
    }

    /// 单独查询某个 key 当前的标签
    pub async fn current_tag(&self, key: &str) -> Result<Option<Fingerprint>> {
        let tag = self.store.head_tag(key).await?;
        debug!("head {} -> {:?}", key, tag);
        Ok(tag)
    }
}

/// 以 `/` 结尾的 key 是目录标记，其余是文件
pub fn partition(objects: Vec<RemoteObject>) -> RemoteTree {
    let mut tree = RemoteTree::default();

    for object in objects {
        if object.is_dir_marker() {
            let name = object.key.trim_end_matches('/');
            if !name.is_empty() {
                tree.directories.insert(name.to_string());
            }
            continue;
        }

        match object.etag {
            Some(etag) => {
                tree.files.insert(object.key, etag);
            }
            None => {
                // 没有标签的对象无法比较，按必须重新传输处理
                warn!("对象缺少 ETag: {}", object.key);
                tree.files.insert(object.key, Fingerprint::from_remote(""));
            }
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(key: &str, etag: Option<&str>) -> RemoteObject {
        RemoteObject {
            key: key.to_string(),
            etag: etag.map(Fingerprint::from_remote),
        }
    }

    #[test]
    fn test_partition() {
        let tree = partition(vec![
            obj("a/", None),
            obj("a/b/", Some("d41d8cd98f00b204e9800998ecf8427e")),
            obj("a/x", Some("\"abc\"")),
            obj("top", Some("\"def-2\"")),
        ]);

        assert_eq!(
            tree.directories.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["a", "a/b"]
        );
        assert_eq!(tree.files.len(), 2);
        assert_eq!(tree.files["a/x"], Fingerprint::from_remote("abc"));
        assert_eq!(tree.files["top"].part_count(), Some(2));
    }

    #[test]
    fn test_missing_etag_never_matches() {
        let tree = partition(vec![obj("k", None)]);
        let real = Fingerprint::from_remote("5d41402abc4b2a76b9719d911017c592");
        assert_ne!(tree.files["k"], real);
    }
}
