use crate::core::diff::{DirectorySet, FileIndex};
use crate::core::fingerprint::{compute_fingerprint, Fingerprint, DEFAULT_CHUNK_SIZE};
use anyhow::Result;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 排除规则（glob patterns），相对于扫描根目录匹配
    pub exclude_patterns: Vec<String>,
}

/// 本地目录树的扫描结果
#[derive(Debug, Clone, Default)]
pub struct LocalTree {
    /// 候选目录标记（包括根目录本身）
    pub directories: DirectorySet,
    /// 相对路径 -> 指纹
    pub files: FileIndex,
    /// 实际扫描的根目录
    pub root: PathBuf,
    /// 根目录对应的 key 前缀
    pub prefix: String,
}

impl LocalTree {
    /// key 对应的本地文件路径
    pub fn local_path(&self, key: &str) -> PathBuf {
        let relative = if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(self.prefix.as_str())
                .map(|rest| rest.trim_start_matches('/'))
                .unwrap_or(key)
        };
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

/// 本地目录扫描器
///
/// 记录的路径相对于 `base`（通常是当前工作目录），所以备份 `photos` 时
/// 远端 key 形如 `photos/2024/a.jpg`。
pub struct LocalTreeScanner {
    base: PathBuf,
    chunk_size: usize,
    config: ScanConfig,
}

impl LocalTreeScanner {
    pub fn new(base: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            base: base.into(),
            chunk_size,
            config: ScanConfig::default(),
        }
    }

    pub fn with_config(base: impl Into<PathBuf>, chunk_size: usize, config: ScanConfig) -> Self {
        Self {
            base: base.into(),
            chunk_size,
            config,
        }
    }

    /// 扫描目录树（在阻塞线程中执行）
    pub async fn scan(&self, root: &Path) -> Result<LocalTree> {
        let prefix = self.key_prefix(root);
        let root = self.base.join(root);
        let chunk_size = self.chunk_size;
        let config = self.config.clone();

        info!("开始扫描本地目录: {} (前缀 {:?})", root.display(), prefix);

        let tree = tokio::task::spawn_blocking(move || {
            Self::scan_blocking(&root, &prefix, chunk_size, &config)
        })
        .await?;

        info!(
            "扫描完成: {} 个文件, {} 个目录",
            tree.files.len(),
            tree.directories.len()
        );

        Ok(tree)
    }

    fn scan_blocking(root: &Path, prefix: &str, chunk_size: usize, config: &ScanConfig) -> LocalTree {
        let mut tree = LocalTree {
            root: root.to_path_buf(),
            prefix: prefix.to_string(),
            ..Default::default()
        };
        let mut excluded_count = 0;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let excluded = entry
                    .path()
                    .strip_prefix(root)
                    .ok()
                    .and_then(Path::to_str)
                    .filter(|rel| !rel.is_empty())
                    .is_some_and(|rel| should_exclude(&config.exclude_patterns, &normalize_separators(rel)));
                if excluded {
                    debug!("排除: {}", entry.path().display());
                    excluded_count += 1;
                }
                !excluded
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("遍历目录出错: {}", e);
                    continue;
                }
            };

            let Some(relative) = entry.path().strip_prefix(root).ok().and_then(Path::to_str) else {
                warn!("跳过无法表示为 UTF-8 的路径: {}", entry.path().display());
                continue;
            };
            let key = join_key(prefix, &normalize_separators(relative));

            if entry.file_type().is_dir() {
                if !key.is_empty() {
                    tree.directories.insert(key);
                }
                continue;
            }

            // 指向文件的符号链接按普通文件处理
            if !entry.file_type().is_file() && !entry.path().is_file() {
                debug!("跳过非普通文件: {}", entry.path().display());
                continue;
            }

            match compute_fingerprint(entry.path(), chunk_size) {
                Ok(Fingerprint::NotFound) => debug!("文件在扫描过程中消失: {}", key),
                Ok(fp) => {
                    tree.files.insert(key, fp);
                }
                Err(e) => warn!("无法读取文件 {}: {}", entry.path().display(), e),
            }
        }

        if excluded_count > 0 {
            info!("{} 个条目被排除", excluded_count);
        }

        tree
    }

    /// 扫描根目录相对于 base 的 key 前缀
    fn key_prefix(&self, root: &Path) -> String {
        let cwd = std::env::current_dir().unwrap_or_default();
        key_prefix_in(&cwd, &self.base, root)
    }
}

/// 计算 key 前缀：base 与 root 都先按 `cwd` 转成绝对路径再比较
///
/// 根目录不在 base 之下时退化为根目录自身的名字，所以同一棵树无论以相对
/// 路径还是绝对路径给出，得到的 key 都相同。
fn key_prefix_in(cwd: &Path, base: &Path, root: &Path) -> String {
    let base = lexical_normalize(&cwd.join(base));
    let root = lexical_normalize(&base.join(root));

    let relative = match root.strip_prefix(&base) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => root.file_name().map(PathBuf::from).unwrap_or_default(),
    };

    normalize_separators(&relative.to_string_lossy())
}

impl Default for LocalTreeScanner {
    fn default() -> Self {
        Self::new(PathBuf::from("."), DEFAULT_CHUNK_SIZE)
    }
}

/// 去掉 `.`、折叠 `..`，不访问文件系统
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn normalize_separators(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

fn join_key(prefix: &str, relative: &str) -> String {
    match (prefix.is_empty(), relative.is_empty()) {
        (true, _) => relative.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, relative),
    }
}

/// 检查路径是否应该被排除
fn should_exclude(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|pattern| matches_pattern(path, pattern))
}

/// 简单的 glob 模式匹配
fn matches_pattern(path: &str, pattern: &str) -> bool {
    let path = path.to_lowercase();
    let pattern = pattern.to_lowercase();

    // 处理 ** 通配符
    if let Some((prefix, suffix)) = pattern.split_once("**") {
        let prefix = prefix.trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        let under_prefix = prefix.is_empty()
            || path == prefix
            || path.starts_with(&format!("{}/", prefix));
        return under_prefix && (suffix.is_empty() || path.ends_with(suffix));
    }

    // 处理 * 通配符，只匹配文件名部分
    if pattern.contains('*') {
        let name = path.rsplit('/').next().unwrap_or(&path);
        let regex_pattern = regex::escape(&pattern).replace("\\*", ".*");
        return regex::Regex::new(&format!("^{}$", regex_pattern))
            .map(|re| re.is_match(name))
            .unwrap_or(false);
    }

    // 精确匹配
    path == pattern || path.ends_with(&format!("/{}", pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_scan_records_dirs_and_files_relative_to_base() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("a/b")).unwrap();
        std::fs::write(base.path().join("a/x"), b"hello").unwrap();

        let scanner = LocalTreeScanner::new(base.path(), DEFAULT_CHUNK_SIZE);
        let tree = scanner.scan(Path::new("a")).await.unwrap();

        assert_eq!(tree.directories, set(&["a", "a/b"]));
        assert_eq!(tree.files.len(), 1);
        assert_eq!(
            tree.files["a/x"],
            Fingerprint::Tag("\"5d41402abc4b2a76b9719d911017c592\"".into())
        );
    }

    #[tokio::test]
    async fn test_scan_base_itself_has_no_root_marker() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir(base.path().join("d")).unwrap();
        std::fs::write(base.path().join("top.txt"), b"1").unwrap();
        std::fs::write(base.path().join("d/inner.txt"), b"2").unwrap();

        let scanner = LocalTreeScanner::new(base.path(), DEFAULT_CHUNK_SIZE);
        let tree = scanner.scan(Path::new(".")).await.unwrap();

        assert_eq!(tree.directories, set(&["d"]));
        assert_eq!(
            tree.files.keys().cloned().collect::<BTreeSet<_>>(),
            set(&["d/inner.txt", "top.txt"])
        );
    }

    #[tokio::test]
    async fn test_root_outside_base_uses_its_name() {
        let base = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let root = other.path().join("photos");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("p.jpg"), b"jpg").unwrap();

        let scanner = LocalTreeScanner::new(base.path(), DEFAULT_CHUNK_SIZE);
        let tree = scanner.scan(&root).await.unwrap();

        assert_eq!(tree.directories, set(&["photos"]));
        assert!(tree.files.contains_key("photos/p.jpg"));
        assert_eq!(tree.local_path("photos/p.jpg"), root.join("p.jpg"));
    }

    #[tokio::test]
    async fn test_excluded_directory_is_not_descended() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(base.path().join("r/.git/objects")).unwrap();
        std::fs::write(base.path().join("r/.git/objects/o"), b"x").unwrap();
        std::fs::write(base.path().join("r/keep.txt"), b"y").unwrap();
        std::fs::write(base.path().join("r/skip.tmp"), b"z").unwrap();

        let config = ScanConfig {
            exclude_patterns: vec![".git/**".into(), "*.tmp".into()],
        };
        let scanner = LocalTreeScanner::with_config(base.path(), DEFAULT_CHUNK_SIZE, config);
        let tree = scanner.scan(Path::new("r")).await.unwrap();

        assert_eq!(tree.directories, set(&["r"]));
        assert_eq!(tree.files.keys().cloned().collect::<BTreeSet<_>>(), set(&["r/keep.txt"]));
    }

    #[tokio::test]
    async fn test_absolute_root_matches_relative_keys() {
        let other = tempfile::tempdir().unwrap();
        let root = other.path().join("a");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("x"), b"x").unwrap();

        let scanner = LocalTreeScanner::new(".", DEFAULT_CHUNK_SIZE);
        let tree = scanner.scan(&root).await.unwrap();

        assert_eq!(tree.directories, set(&["a"]));
        assert_eq!(tree.files.keys().cloned().collect::<BTreeSet<_>>(), set(&["a/x"]));
    }

    #[test]
    fn test_key_prefix_ignores_how_root_is_spelled() {
        let cwd = Path::new("/home/u");
        assert_eq!(key_prefix_in(cwd, Path::new("."), Path::new("a")), "a");
        assert_eq!(key_prefix_in(cwd, Path::new("."), Path::new("/home/u/a")), "a");
        assert_eq!(key_prefix_in(cwd, Path::new("."), Path::new("/home/u/a/b/..")), "a");
        assert_eq!(key_prefix_in(cwd, Path::new("."), Path::new("/srv/data/a")), "a");
        assert_eq!(key_prefix_in(cwd, Path::new("."), Path::new(".")), "");
        assert_eq!(key_prefix_in(cwd, Path::new("/srv"), Path::new("/srv/data/a")), "data/a");
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(lexical_normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(lexical_normalize(Path::new("./x")), PathBuf::from("x"));
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("node_modules/pkg/index.js", "node_modules/**"));
        assert!(matches_pattern("docs/Thumbs.db", "thumbs.db"));
        assert!(matches_pattern("a/b/c.TMP", "*.tmp"));
        assert!(!matches_pattern("a/b/c.txt", "*.tmp"));
        assert!(matches_pattern(".git", ".git/**"));
        assert!(matches_pattern(".git/objects/o", ".git/**"));
        assert!(!matches_pattern(".gitignore", ".git/**"));
        assert!(!matches_pattern(".github/ci.yml", ".git/**"));
    }
}
