// 上传任务定义
//
// TaskRecord 是调度器内部的记账单元，外部只能看到 TaskSnapshot

use crate::uploader::provider::{ProgressSink, Provider};
use crate::uploader::UploadError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;

/// 任务ID（调度器生命周期内单调递增，不复用）
pub type TaskId = u64;

/// 任务最终结果
pub type TaskOutcome = std::result::Result<UploadResult, UploadError>;

/// 待上传文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    /// 文件名（用于生成对象 key）
    pub name: String,
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 文件大小
    pub size: u64,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, local_path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            name: name.into(),
            local_path: local_path.into(),
            size,
        }
    }

    /// 从本地文件构建（读取元数据，拒绝目录）
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .context(format!("无法获取文件元数据: {:?}", path))?;

        if metadata.is_dir() {
            anyhow::bail!("不支持直接上传目录: {:?}", path);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context(format!("无法获取文件名: {:?}", path))?;

        Ok(Self::new(name, path, metadata.len()))
    }
}

/// Provider 上传结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// 对象访问地址
    pub url: String,
}

/// 已完成任务记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedUpload {
    pub task_id: TaskId,
    pub file_name: String,
    pub url: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

/// 任务生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// 等待中
    Waiting,
    /// 上传中
    Running,
    /// 已暂停（等待或运行中均可能）
    Paused,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskState {
    /// 终态不会再迁移
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// 由最终结果推导终态
    pub fn from_outcome(outcome: &TaskOutcome) -> Self {
        match outcome {
            Ok(_) => TaskState::Completed,
            Err(e) if e.is_cancelled() => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        }
    }
}

/// 任务所在集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskSlot {
    Waiting,
    Running,
}

/// 任务快照（只读视图）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub file_name: String,
    pub size: u64,
    pub slot: TaskSlot,
    pub paused: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// 生命周期状态（暂停标志优先于所在集合）
    pub fn state(&self) -> TaskState {
        match (self.paused, self.slot) {
            (true, _) => TaskState::Paused,
            (false, TaskSlot::Waiting) => TaskState::Waiting,
            (false, TaskSlot::Running) => TaskState::Running,
        }
    }
}

/// 调度器内部任务记录
pub(crate) struct TaskRecord {
    pub id: TaskId,
    /// 本任务独占的 Provider
    pub provider: Arc<dyn Provider>,
    pub file: UploadFile,
    pub slot: TaskSlot,
    pub paused: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub progress: ProgressSink,
    responder: oneshot::Sender<TaskOutcome>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        provider: Arc<dyn Provider>,
        file: UploadFile,
        progress: ProgressSink,
        responder: oneshot::Sender<TaskOutcome>,
    ) -> Self {
        Self {
            id,
            provider,
            file,
            slot: TaskSlot::Waiting,
            paused: false,
            started_at: None,
            progress,
            responder,
        }
    }

    /// 标记为运行中
    pub fn mark_running(&mut self) {
        self.slot = TaskSlot::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            file_name: self.file.name.clone(),
            size: self.file.size,
            slot: self.slot,
            paused: self.paused,
            started_at: self.started_at,
        }
    }

    /// 交付最终结果（消费记录，保证只交付一次）
    ///
    /// 先关闭进度通道，之后的进度上报全部丢弃
    pub fn resolve(self, outcome: TaskOutcome) {
        self.progress.close();
        // 接收端已丢弃说明调用方不再关心结果
        let _ = self.responder.send(outcome);
    }
}
