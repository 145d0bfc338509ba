// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadSettings,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
    /// 存储配置列表（按用户排序）
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSettings {
    /// 最大同时上传文件数
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    crate::uploader::DEFAULT_MAX_CONCURRENCY
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl UploadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            anyhow::bail!("最大并发上传数必须大于 0");
        }
        Ok(())
    }
}

/// 存储类型
///
/// 持久化为字符串，无法识别的类型保留原值，在上传时报告为不支持
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackendType {
    /// S3 兼容存储
    Aws,
    /// 七牛云存储
    Qiniu,
    /// 其他（尚未支持的）类型
    Other(String),
}

impl BackendType {
    pub fn as_str(&self) -> &str {
        match self {
            BackendType::Aws => "aws",
            BackendType::Qiniu => "qiniu",
            BackendType::Other(name) => name,
        }
    }

    /// 界面展示名称
    pub fn label(&self) -> &str {
        match self {
            BackendType::Aws => "AWS S3",
            BackendType::Qiniu => "七牛云存储",
            BackendType::Other(name) => name,
        }
    }
}

impl From<String> for BackendType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "aws" => BackendType::Aws,
            "qiniu" => BackendType::Qiniu,
            _ => BackendType::Other(value),
        }
    }
}

impl From<BackendType> for String {
    fn from(value: BackendType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 存储配置
///
/// 字段名与扩展存储中的持久化格式一致（camelCase）
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// 配置名称
    pub name: String,
    /// 存储类型
    #[serde(rename = "type")]
    pub backend: BackendType,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// 自定义端点（S3 兼容存储）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 上传路径前缀
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl StorageConfig {
    /// 解析扩展存储中的 JSON 配置
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("存储配置解析失败")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("存储配置序列化失败")
    }

    /// 校验必填项
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("存储配置名称不能为空");
        }
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            anyhow::bail!("存储配置 {} 缺少访问密钥", self.name);
        }
        if self.bucket.is_empty() {
            anyhow::bail!("存储配置 {} 缺少 bucket", self.name);
        }
        Ok(())
    }

    /// 生成对象 key：有路径前缀时拼接为 `前缀/文件名`
    pub fn object_key(&self, file_name: &str) -> String {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(prefix) if prefix.ends_with('/') => format!("{}{}", prefix, file_name),
            Some(prefix) => format!("{}/{}", prefix, file_name),
            None => file_name.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_config(backend: BackendType) -> Self {
        Self {
            name: "test".to_string(),
            backend,
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: None,
            bucket: "bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            path: None,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不输出密钥
        f.debug_struct("StorageConfig")
            .field("name", &self.name)
            .field("backend", &self.backend)
            .field("access_key_id", &self.access_key_id)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("path", &self.path)
            .finish()
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {:?}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    pub async fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {:?}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }

    /// 校验上传参数和所有存储配置
    pub fn validate(&self) -> Result<()> {
        self.upload.validate()?;
        for storage in &self.storages {
            storage.validate()?;
        }
        Ok(())
    }

    /// 按名称查找存储配置
    pub fn storage(&self, name: &str) -> Option<&StorageConfig> {
        self.storages.iter().find(|s| s.name == name)
    }
}
