use bucketsync_lib::cli;
use bucketsync_lib::core::Direction;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// 把本地目录中新增或修改的文件备份到 S3 bucket
#[derive(Debug, Parser)]
#[command(name = "backup", version, about)]
struct Args {
    /// 要备份的本地目录
    local_directory: PathBuf,
    /// 目标 bucket，不存在时自动创建
    bucket_name: String,
    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    cli::run(
        Direction::Upload,
        &args.local_directory,
        &args.bucket_name,
        args.config,
    )
    .await
}
