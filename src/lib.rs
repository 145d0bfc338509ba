// Object Uploader Library
// 对象存储上传队列核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 上传调度模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, BackendType, LogConfig, StorageConfig, UploadSettings};
pub use logging::{init_logging, LogGuard};
pub use uploader::{
    create_uploader, CancelReason, PendingUpload, Progress, ProgressCallback, ProgressSink,
    Provider, ProviderRegistry, TaskHandle, TaskId, TaskState, TransferControl, UploadError,
    UploadFile, UploadOptions, UploadResult, UploadScheduler, Uploader,
};
