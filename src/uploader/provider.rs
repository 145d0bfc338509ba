// 存储后端 Provider 抽象
//
// 每种后端（S3 兼容、七牛等）独立实现 Provider，
// 由 ProviderRegistry 按配置中的存储类型选择对应工厂创建实例。
// 每个上传任务独占一个 Provider 实例。

use crate::config::{BackendType, StorageConfig};
use crate::uploader::{TaskId, UploadError, UploadFile, UploadResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// 上传进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// 所属任务
    pub task_id: TaskId,
    /// 已上传字节数
    pub loaded: u64,
    /// 总字节数（未知时为 None）
    pub total: Option<u64>,
    /// 分片序号（分片上传时）
    pub part: Option<u32>,
}

/// 进度回调类型
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// 进度上报通道
///
/// 提交任务时创建并随 `upload` 传给 Provider。任务结束后通道关闭，
/// 迟到的上报被丢弃，保证进度事件不会出现在任务结果之后。
#[derive(Clone)]
pub struct ProgressSink {
    task_id: TaskId,
    callback: Option<ProgressCallback>,
    closed: Arc<AtomicBool>,
}

impl ProgressSink {
    pub fn new(task_id: TaskId, callback: Option<ProgressCallback>) -> Self {
        Self {
            task_id,
            callback,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 上报进度
    pub fn report(&self, loaded: u64, total: Option<u64>, part: Option<u32>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        if let Some(callback) = &self.callback {
            callback(Progress {
                task_id: self.task_id,
                loaded,
                total,
                part,
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("task_id", &self.task_id)
            .field("has_callback", &self.callback.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 存储后端能力集
///
/// `pause`/`resume` 是建议性的，不支持断点暂停的后端可以不实现。
/// `cancel` 必须让进行中的 `upload` 尽快以 `UploadError::Cancelled` 失败，
/// 且多次调用或完成后调用都不能出错。
#[async_trait]
pub trait Provider: Send + Sync {
    /// 上传文件
    async fn upload(
        &self,
        file: UploadFile,
        progress: ProgressSink,
    ) -> Result<UploadResult, UploadError>;

    /// 暂停（尽力而为）
    fn pause(&self) {}

    /// 恢复（尽力而为）
    fn resume(&self) {}

    /// 取消
    fn cancel(&self);
}

/// Provider 工厂
pub trait ProviderFactory: Send + Sync {
    fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Provider>, UploadError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&StorageConfig) -> Result<Arc<dyn Provider>, UploadError> + Send + Sync,
{
    fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Provider>, UploadError> {
        self(config)
    }
}

/// 存储类型 -> Provider 工厂
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<BackendType, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册后端工厂（同类型重复注册时覆盖）
    pub fn register<F>(&mut self, backend: BackendType, factory: F)
    where
        F: Fn(&StorageConfig) -> Result<Arc<dyn Provider>, UploadError> + Send + Sync + 'static,
    {
        self.register_factory(backend, Arc::new(factory));
    }

    /// 注册实现了 ProviderFactory 的工厂对象
    pub fn register_factory(&mut self, backend: BackendType, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(backend, factory);
    }

    /// 链式注册
    pub fn with<F>(mut self, backend: BackendType, factory: F) -> Self
    where
        F: Fn(&StorageConfig) -> Result<Arc<dyn Provider>, UploadError> + Send + Sync + 'static,
    {
        self.register(backend, factory);
        self
    }

    pub fn supports(&self, backend: &BackendType) -> bool {
        self.factories.contains_key(backend)
    }

    /// 为一次上传创建新的 Provider 实例
    pub fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Provider>, UploadError> {
        match self.factories.get(&config.backend) {
            Some(factory) => factory.create(config),
            None => {
                warn!(
                    "不支持的存储类型: {}, 配置={}",
                    config.backend, config.name
                );
                Err(UploadError::UnsupportedBackend(config.backend.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("backends", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::testing::MockProvider;
    use parking_lot::Mutex;

    #[test]
    fn test_sink_stamps_task_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = ProgressSink::new(
            7,
            Some(Arc::new(move |p: Progress| seen_clone.lock().push(p))),
        );

        sink.report(10, Some(100), None);
        sink.report(100, Some(100), Some(2));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].task_id, 7);
        assert_eq!(seen[1].part, Some(2));
    }

    #[test]
    fn test_sink_drops_reports_after_close() {
        let count = Arc::new(Mutex::new(0));
        let count_clone = count.clone();
        let sink = ProgressSink::new(1, Some(Arc::new(move |_: Progress| *count_clone.lock() += 1)));
        let provider_side = sink.clone();

        provider_side.report(1, None, None);
        sink.close();
        provider_side.report(2, None, None);

        assert!(provider_side.is_closed());
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_registry_unsupported_backend() {
        let registry = ProviderRegistry::new();
        let config = StorageConfig::test_config(BackendType::Qiniu);

        let err = registry.create(&config).err().unwrap();
        assert_eq!(err, UploadError::UnsupportedBackend("qiniu".to_string()));
    }

    #[test]
    fn test_registry_creates_fresh_instances() {
        let registry = ProviderRegistry::new().with(BackendType::Aws, |_| {
            let (provider, _remote) = MockProvider::new();
            Ok(provider as Arc<dyn Provider>)
        });
        let config = StorageConfig::test_config(BackendType::Aws);

        assert!(registry.supports(&BackendType::Aws));
        assert!(!registry.supports(&BackendType::Qiniu));

        let a = registry.create(&config).unwrap();
        let b = registry.create(&config).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_registry_factory_error_passes_through() {
        let registry = ProviderRegistry::new().with(BackendType::Aws, |config| {
            Err(UploadError::transfer(format!("缺少 endpoint: {}", config.name)))
        });
        let config = StorageConfig::test_config(BackendType::Aws);

        assert!(matches!(
            registry.create(&config),
            Err(UploadError::Transfer(_))
        ));
    }
}
