// 上传错误定义
//
// 三类错误：
// - UnsupportedBackend：配置的存储类型没有注册 Provider（同步失败，不入队）
// - Transfer：Provider 自身上传失败（异步，经任务结果返回）
// - Cancelled：用户取消或清空队列

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 取消原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// 用户取消单个任务
    User,
    /// 清空队列
    QueueCleared,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::User => write!(f, "Task cancelled"),
            CancelReason::QueueCleared => write!(f, "Queue cleared"),
        }
    }
}

/// 上传错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// 不支持的存储类型
    #[error("Unsupported upload type: {0}")]
    UnsupportedBackend(String),

    /// 传输失败（网络、鉴权、服务端拒绝等）
    #[error("传输失败: {0}")]
    Transfer(String),

    /// 任务已取消
    #[error("{0}")]
    Cancelled(CancelReason),
}

impl UploadError {
    /// 从任意错误构造传输错误
    pub fn transfer(err: impl std::fmt::Display) -> Self {
        UploadError::Transfer(err.to_string())
    }

    /// 是否为取消（调用方可据此忽略用户主动取消的噪音）
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled(_))
    }
}

impl From<anyhow::Error> for UploadError {
    fn from(err: anyhow::Error) -> Self {
        UploadError::Transfer(format!("{:#}", err))
    }
}
