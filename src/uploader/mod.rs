// 上传模块
//
// - Provider：存储后端能力抽象（上传/暂停/恢复/取消/进度）
// - UploadScheduler：等待/运行队列、并发控制、任务状态迁移
// - Uploader：绑定一份存储配置，对外提供 upload/cancel/pause/resume

pub mod control;
pub mod error;
pub mod manager;
pub mod provider;
pub mod scheduler;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use control::TransferControl;
pub use error::{CancelReason, UploadError};
pub use manager::{
    create_uploader, ErrorCallback, SuccessCallback, UploadOptions, Uploader,
};
pub use provider::{
    Progress, ProgressCallback, ProgressSink, Provider, ProviderFactory, ProviderRegistry,
};
pub use scheduler::{PendingUpload, TaskHandle, UploadScheduler};
pub use task::{
    CompletedUpload, TaskId, TaskOutcome, TaskSlot, TaskSnapshot, TaskState, UploadFile,
    UploadResult,
};

/// 默认最大并发上传数
pub const DEFAULT_MAX_CONCURRENCY: usize = 6;
