use super::{marker_key, RemoteObject, RemoteStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::core::Fingerprint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::client::Waiters;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator, Writer};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::warn;

/// 不接受 LocationConstraint 的默认区域
const DEFAULT_AWS_REGION: &str = "us-east-1";

/// 等待新建 bucket 可用的最长时间（秒）
const BUCKET_WAIT_SECS: u64 = 60;

/// S3 存储
///
/// 对象读写走 OpenDAL；bucket 的存在性检查与创建走 AWS SDK（OpenDAL 不提供）。
pub struct S3Store {
    operator: Operator,
    client: aws_sdk_s3::Client,
    bucket: String,
    region: String,
    chunk_size: usize,
    name: String,
}

impl S3Store {
    pub async fn new(
        bucket: &str,
        region: &str,
        endpoint: Option<String>,
        chunk_size: usize,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default().bucket(bucket).region(region);

        if let Some(ref ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        // 凭证由 SDK 默认链加载
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let Some(ref ep) = endpoint {
            loader = loader.endpoint_url(ep);
        }
        let client = aws_sdk_s3::Client::new(&loader.load().await);

        Ok(Self {
            operator,
            client,
            bucket: bucket.to_string(),
            region: region.to_string(),
            chunk_size: chunk_size.max(1),
            name: format!("s3://{}", bucket),
        })
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    async fn bucket_exists(&self) -> Result<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(HeadBucketError::is_not_found) {
                    return Ok(false);
                }
                Err(anyhow::Error::new(err)
                    .context(format!("无法访问 bucket {}", self.bucket)))
            }
        }
    }

    async fn create_bucket(&self) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);

        if self.region != DEFAULT_AWS_REGION {
            let configuration = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            request = request.create_bucket_configuration(configuration);
        }

        request
            .send()
            .await
            .with_context(|| format!("创建 bucket {} 失败", self.bucket))?;

        self.client
            .wait_until_bucket_exists()
            .bucket(&self.bucket)
            .wait(Duration::from_secs(BUCKET_WAIT_SECS))
            .await
            .with_context(|| format!("等待 bucket {} 可用超时", self.bucket))?;

        Ok(())
    }

    async fn list_objects(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();

        // lister 内部会跟随 continuation token 取完所有分页
        let mut lister = self
            .operator
            .lister_with("")
            .recursive(true)
            .metakey(Metakey::Mode | Metakey::Etag)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let key = entry.path();

            // 跳过根目录
            if key.is_empty() || key == "/" {
                continue;
            }

            objects.push(RemoteObject {
                key: key.trim_start_matches('/').to_string(),
                etag: entry.metadata().etag().map(Fingerprint::from_remote),
            });
        }

        Ok(objects)
    }

    async fn head_tag(&self, key: &str) -> Result<Option<Fingerprint>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(meta.etag().map(Fingerprint::from_remote)),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_directory_marker(&self, name: &str) -> Result<()> {
        // 覆盖已有的零字节标记没有副作用
        self.operator.create_dir(&marker_key(name)).await?;
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, key: &str) -> Result<()> {
        upload_parts(&self.operator, local_path, key, self.chunk_size).await
    }

    async fn download_file(&self, key: &str, local_path: &Path) -> Result<()> {
        download_ranges(&self.operator, key, local_path, self.chunk_size).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// 按固定分段大小上传文件，失败时放弃未完成的分段上传
///
/// 分段大小与指纹分块大小一致，远端 ETag 才能与本地指纹比较。
async fn upload_parts(
    operator: &Operator,
    local_path: &Path,
    key: &str,
    chunk_size: usize,
) -> Result<()> {
    let mut file = fs::File::open(local_path).await?;
    let mut writer = operator.writer_with(key).chunk(chunk_size).await?;

    if let Err(e) = write_chunks(&mut file, &mut writer, chunk_size).await {
        if let Err(abort_err) = writer.abort().await {
            warn!("放弃分段上传失败 {}: {}", key, abort_err);
        }
        return Err(e);
    }
    Ok(())
}

async fn write_chunks(file: &mut fs::File, writer: &mut Writer, chunk_size: usize) -> Result<()> {
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let n = read_full(file, &mut buffer).await?;
        if n == 0 {
            break;
        }
        writer.write(buffer[..n].to_vec()).await?;
        if n < chunk_size {
            break;
        }
    }
    writer.close().await?;
    Ok(())
}

/// 分段读取对象写入临时文件，完成后原子重命名；失败时删除临时文件
async fn download_ranges(
    operator: &Operator,
    key: &str,
    local_path: &Path,
    chunk_size: usize,
) -> Result<()> {
    let size = operator.stat(key).await?.content_length();

    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = super::local::temp_path_for(local_path);
    let result = async {
        let mut file = fs::File::create(&temp_path).await?;
        let chunk = chunk_size as u64;
        let mut offset = 0;
        while offset < size {
            let end = (offset + chunk).min(size);
            let data = operator.read_with(key).range(offset..end).await?;
            file.write_all(&data.to_vec()).await?;
            offset = end;
        }
        file.flush().await?;
        drop(file);
        fs::rename(&temp_path, local_path).await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&temp_path).await;
    }
    result
}

/// 读满缓冲区或直到 EOF
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_full_fills_across_short_reads() {
        let data: Vec<u8> = (0..10).collect();
        let (client, mut server) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            server.write_all(&data).await.unwrap();
        });

        let mut reader = client;
        let mut buffer = [0u8; 8];
        let n = read_full(&mut reader, &mut buffer).await.unwrap();
        assert_eq!(n, 8);
        assert_eq!(&buffer, &[0, 1, 2, 3, 4, 5, 6, 7]);

        writer.await.unwrap();
        let mut rest = [0u8; 8];
        let n = read_full(&mut reader, &mut rest).await.unwrap();
        assert_eq!(&rest[..n], &[8, 9]);
    }

    fn memory_operator() -> Operator {
        Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish()
    }

    #[tokio::test]
    async fn test_upload_then_ranged_download() {
        let op = memory_operator();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"0123456789").unwrap();

        upload_parts(&op, &src, "k", 4).await.unwrap();
        let dest = dir.path().join("out/k");
        download_ranges(&op, "k", &dest, 4).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
        assert!(!dir.path().join("out/k.part").exists());
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_temp_file() {
        let op = memory_operator();
        op.write("k", b"data".to_vec()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        // 目标是非空目录，重命名必然失败
        let dest = dir.path().join("k");
        std::fs::create_dir_all(dest.join("child")).unwrap();

        assert!(download_ranges(&op, "k", &dest, 4).await.is_err());
        assert!(!dir.path().join("k.part").exists());
    }

    #[tokio::test]
    async fn test_failed_upload_commits_nothing() {
        let op = memory_operator();
        let dir = tempfile::tempdir().unwrap();

        // 目录可以打开但读取失败
        assert!(upload_parts(&op, dir.path(), "k", 4).await.is_err());
        let err = op.stat("k").await.unwrap_err();
        assert_eq!(err.kind(), opendal::ErrorKind::NotFound);
    }
}
