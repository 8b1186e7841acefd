//! 内容指纹 - 与 S3 ETag（含分段上传）算法逐位一致
//!
//! 单段对象的 ETag 是整个内容的 MD5；分段对象的 ETag 是各段 MD5 二进制摘要
//! 拼接后再做一次 MD5，并在末尾附加 `-段数`。只要本地分块大小与上传时的
//! 分段大小一致，同样的内容在本地和远端得到的指纹完全相同。

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// 默认分块大小（8 MiB）
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 本地文件不存在时的哨兵字符串（不带引号）
pub const NOT_FOUND: &str = "not found";

/// 文件内容指纹
///
/// `Tag` 总是带引号的形式（`"<hex>"` 或 `"<hex>-<n>"`），而 `NotFound`
/// 的字符串形式不带引号，因此两者永远不会相等。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fingerprint {
    Tag(String),
    NotFound,
}

impl Fingerprint {
    /// 从远端返回的 ETag 构造指纹，缺少引号时补齐
    pub fn from_remote(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            Fingerprint::Tag(raw.to_string())
        } else {
            Fingerprint::Tag(format!("\"{}\"", raw.trim_matches('"')))
        }
    }

    /// 由各分块的 MD5 摘要组装指纹
    ///
    /// 零个分块（空文件）按 S3 的约定处理为空内容的 MD5。
    pub fn from_part_digests(digests: &[md5::Digest]) -> Self {
        match digests {
            [] => Fingerprint::Tag(format!("\"{:x}\"", md5::compute(b""))),
            [single] => Fingerprint::Tag(format!("\"{:x}\"", single)),
            parts => {
                let mut joined = Vec::with_capacity(parts.len() * 16);
                for digest in parts {
                    joined.extend_from_slice(&digest.0);
                }
                Fingerprint::Tag(format!(
                    "\"{:x}-{}\"",
                    md5::compute(&joined),
                    parts.len()
                ))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Fingerprint::Tag(tag) => tag,
            Fingerprint::NotFound => NOT_FOUND,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Fingerprint::NotFound)
    }

    /// 分段数；单段对象返回 1，哨兵返回 None
    pub fn part_count(&self) -> Option<usize> {
        let Fingerprint::Tag(tag) = self else {
            return None;
        };
        let inner = tag.trim_matches('"');
        match inner.rsplit_once('-') {
            Some((_, count)) => count.parse().ok(),
            None => Some(1),
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 计算本地文件的指纹
///
/// 文件不存在时返回 [`Fingerprint::NotFound`]，其它 I/O 错误原样返回。
pub fn compute_fingerprint(path: &Path, chunk_size: usize) -> io::Result<Fingerprint> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Fingerprint::NotFound),
        Err(e) => return Err(e),
    };
    fingerprint_reader(file, chunk_size)
}

/// 在阻塞线程中计算指纹
pub async fn compute_fingerprint_async(path: PathBuf, chunk_size: usize) -> io::Result<Fingerprint> {
    tokio::task::spawn_blocking(move || compute_fingerprint(&path, chunk_size))
        .await
        .map_err(io::Error::other)?
}

/// 按固定大小分块读取并计算指纹，结果与底层 read 的返回粒度无关
pub fn fingerprint_reader<R: Read>(mut reader: R, chunk_size: usize) -> io::Result<Fingerprint> {
    let chunk_size = chunk_size.max(1);
    let mut buffer = vec![0u8; chunk_size];
    let mut digests = Vec::new();

    loop {
        let n = read_chunk(&mut reader, &mut buffer)?;
        if n == 0 {
            break;
        }
        digests.push(md5::compute(&buffer[..n]));
        if n < chunk_size {
            break;
        }
    }

    Ok(Fingerprint::from_part_digests(&digests))
}

/// 尽量填满缓冲区，只有到达 EOF 才会返回不足一块的长度
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
