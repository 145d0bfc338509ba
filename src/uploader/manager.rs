// 上传器
//
// 绑定一份存储配置（即一种后端类型）和一个调度器：
// - upload 为每个文件创建独立的 Provider 并入队，立即返回任务ID
// - 进度、成功、失败通过回调通知调用方
// - cancel/pause/resume 传入任务ID操作单个任务，传 None 操作全部任务

use crate::config::{StorageConfig, UploadSettings};
use crate::uploader::{
    Progress, ProgressCallback, ProviderRegistry, TaskId, UploadError, UploadFile, UploadResult,
    UploadScheduler, DEFAULT_MAX_CONCURRENCY,
};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 上传成功回调
pub type SuccessCallback = Arc<dyn Fn(TaskId, UploadResult) + Send + Sync>;

/// 上传失败回调
pub type ErrorCallback = Arc<dyn Fn(TaskId, UploadError) + Send + Sync>;

/// 上传器选项
#[derive(Clone)]
pub struct UploadOptions {
    /// 存储配置
    pub config: StorageConfig,
    /// 最大并发数（默认 6）
    pub max_concurrency: Option<usize>,
    on_progress: Option<ProgressCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl UploadOptions {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            max_concurrency: None,
            on_progress: None,
            on_success: None,
            on_error: None,
        }
    }

    /// 使用应用配置中的上传参数
    pub fn from_settings(config: StorageConfig, settings: &UploadSettings) -> Self {
        Self::new(config).with_max_concurrency(settings.max_concurrency)
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(Progress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn on_success(
        mut self,
        callback: impl Fn(TaskId, UploadResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(TaskId, UploadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("config", &self.config)
            .field("max_concurrency", &self.max_concurrency)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// 上传器
pub struct Uploader {
    config: StorageConfig,
    registry: ProviderRegistry,
    scheduler: UploadScheduler,
    on_progress: Option<ProgressCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

/// 创建上传器
pub fn create_uploader(options: UploadOptions, registry: ProviderRegistry) -> Uploader {
    Uploader::new(options, registry)
}

impl Uploader {
    pub fn new(options: UploadOptions, registry: ProviderRegistry) -> Self {
        let max_concurrency = options.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY);

        info!(
            "创建上传器: 配置={}, 类型={}, 最大并发数={}",
            options.config.name, options.config.backend, max_concurrency
        );
        if !registry.supports(&options.config.backend) {
            warn!(
                "存储类型 {} 没有可用的 Provider，上传将会失败",
                options.config.backend
            );
        }

        Self {
            config: options.config,
            registry,
            scheduler: UploadScheduler::new(max_concurrency),
            on_progress: options.on_progress,
            on_success: options.on_success,
            on_error: options.on_error,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &UploadScheduler {
        &self.scheduler
    }

    /// 上传文件
    ///
    /// 立即返回任务ID，不等待上传完成；结果通过 on_success/on_error 回调通知。
    /// 存储类型不支持时同步返回 `UnsupportedBackend`，任务不会入队。
    /// 必须在 tokio 运行时中调用。
    pub fn upload(&self, file: UploadFile) -> Result<TaskId, UploadError> {
        let provider = self.registry.create(&self.config)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(UploadError::transfer)?;

        let pending = self
            .scheduler
            .add(provider, file, self.on_progress.clone());
        let task_id = pending.task_id();
        let handle = pending.start();

        let on_success = self.on_success.clone();
        let on_error = self.on_error.clone();
        runtime.spawn(async move {
            match handle.await {
                Ok(result) => {
                    if let Some(callback) = on_success {
                        callback(task_id, result);
                    }
                }
                Err(e) => {
                    if e.is_cancelled() {
                        debug!("上传任务已取消: id={}, 原因: {}", task_id, e);
                    }
                    if let Some(callback) = on_error {
                        callback(task_id, e);
                    }
                }
            }
        });

        Ok(task_id)
    }

    /// 上传本地文件
    pub async fn upload_path(&self, path: impl AsRef<Path>) -> Result<TaskId> {
        let file = UploadFile::from_path(path).await?;
        Ok(self.upload(file)?)
    }

    /// 取消任务；不传任务ID时清空整个队列
    pub fn cancel(&self, task_id: Option<TaskId>) -> bool {
        match task_id {
            Some(task_id) => self.scheduler.cancel(task_id),
            None => {
                self.scheduler.clear();
                true
            }
        }
    }

    /// 暂停任务；不传任务ID时暂停全部
    pub fn pause(&self, task_id: Option<TaskId>) -> bool {
        match task_id {
            Some(task_id) => self.scheduler.pause(task_id),
            None => {
                self.scheduler.pause_all();
                true
            }
        }
    }

    /// 恢复任务；不传任务ID时恢复全部
    pub fn resume(&self, task_id: Option<TaskId>) -> bool {
        match task_id {
            Some(task_id) => self.scheduler.resume(task_id),
            None => {
                self.scheduler.resume_all();
                true
            }
        }
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
