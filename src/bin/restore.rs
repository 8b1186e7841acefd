use bucketsync_lib::cli;
use bucketsync_lib::core::Direction;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// 把 S3 bucket 中的对象恢复到本地目录，内容相同的文件跳过
#[derive(Debug, Parser)]
#[command(name = "restore", version, about)]
struct Args {
    /// 源 bucket，必须已存在
    bucket_name: String,
    /// 恢复到的本地目录
    local_directory: PathBuf,
    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    cli::run(
        Direction::Download,
        &args.local_directory,
        &args.bucket_name,
        args.config,
    )
    .await
}
