//! 应用配置模块
//!
//! 配置文件为 JSON，默认位于 `<config_dir>/bucketsync/config.json`，可通过
//! `BUCKETSYNC_CONFIG` 指定其它路径。各个段独立解析，某一段格式错误只会让
//! 该段回退到默认值。

use crate::logging::LogConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 指定配置文件路径的环境变量
pub const CONFIG_ENV: &str = "BUCKETSYNC_CONFIG";

/// 未配置区域时使用的默认区域
pub const DEFAULT_REGION: &str = "us-west-2";

/// S3 分段上传允许的最小分段（MB）
const MIN_CHUNK_SIZE_MB: u64 = 5;

/// S3 分段上传允许的最大分段（MB）
const MAX_CHUNK_SIZE_MB: u64 = 5 * 1024;

/// 存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Local,
}

/// 存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// 区域，未设置时读取 AWS_REGION / AWS_DEFAULT_REGION
    #[serde(default)]
    pub region: Option<String>,
    /// S3 兼容服务的 endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 本地后端的根目录，每个 bucket 是其下的一个子目录
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

impl StoreConfig {
    pub fn resolved_region(&self) -> String {
        self.region
            .clone()
            .filter(|r| !r.is_empty())
            .or_else(|| std::env::var("AWS_REGION").ok().filter(|r| !r.is_empty()))
            .or_else(|| std::env::var("AWS_DEFAULT_REGION").ok().filter(|r| !r.is_empty()))
            .unwrap_or_else(|| DEFAULT_REGION.to_string())
    }
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// 分块大小（MB），必须与上传时的分段大小一致
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 排除规则（glob patterns）
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

fn default_chunk_size_mb() -> u64 {
    8
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            exclude_patterns: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// 分块大小（字节），限制在 S3 允许的分段范围内
    pub fn chunk_size(&self) -> usize {
        let mb = self.chunk_size_mb.clamp(MIN_CHUNK_SIZE_MB, MAX_CHUNK_SIZE_MB);
        usize::try_from(mb * 1024 * 1024).unwrap_or(usize::MAX)
    }
}

/// 全部配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 配置文件路径
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        crate::dirs::config_dir()
            .map(|p| p.join("bucketsync"))
            .unwrap_or_else(|| PathBuf::from(".bucketsync"))
            .join("config.json")
    }

    /// 从默认位置加载
    pub fn load_default() -> Self {
        Self::load(&Self::config_path())
    }

    /// 从配置文件加载，文件不存在或无法解析时使用默认值
    pub fn load(path: &Path) -> Self {
        let Some(config) = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        else {
            return Self::default();
        };

        Self {
            store: section(&config, "store"),
            sync: section(&config, "sync"),
            log: section(&config, "log"),
        }
    }
}

fn section<T: DeserializeOwned + Default>(config: &serde_json::Value, key: &str) -> T {
    config
        .get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}
