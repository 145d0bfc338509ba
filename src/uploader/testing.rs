// 测试用 Provider
//
// MockProvider 的上传会一直挂起，直到测试通过 MockRemote 放行或失败，
// 或者调度器转发了 cancel。

use crate::uploader::{
    ProgressSink, Provider, TaskOutcome, TransferControl, UploadError, UploadFile, UploadResult,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

pub(crate) struct MockProvider {
    control: TransferControl,
    gate: Mutex<Option<oneshot::Receiver<TaskOutcome>>>,
    upload_calls: AtomicUsize,
    pause_calls: AtomicUsize,
    resume_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

/// 控制 MockProvider 上传结果
pub(crate) struct MockRemote {
    tx: oneshot::Sender<TaskOutcome>,
}

impl MockRemote {
    pub fn complete(self, url: &str) {
        let _ = self.tx.send(Ok(UploadResult {
            url: url.to_string(),
        }));
    }

    pub fn fail(self, message: &str) {
        let _ = self.tx.send(Err(UploadError::transfer(message)));
    }
}

impl MockProvider {
    pub fn new() -> (Arc<Self>, MockRemote) {
        let (tx, rx) = oneshot::channel();
        let provider = Arc::new(Self {
            control: TransferControl::new(),
            gate: Mutex::new(Some(rx)),
            upload_calls: AtomicUsize::new(0),
            pause_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        });
        (provider, MockRemote { tx })
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> usize {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn upload(
        &self,
        file: UploadFile,
        progress: ProgressSink,
    ) -> Result<UploadResult, UploadError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        progress.report(0, Some(file.size), None);

        let gate = self.gate.lock().take();
        let gate = match gate {
            Some(gate) => gate,
            None => return Err(UploadError::transfer("重复上传")),
        };

        let outcome = self
            .control
            .until_cancelled(gate)
            .await?
            .unwrap_or_else(|_| Err(UploadError::transfer("MockRemote 已丢弃")));

        if outcome.is_ok() {
            progress.report(file.size, Some(file.size), None);
        }
        outcome
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.control.pause();
    }

    fn resume(&self) {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        self.control.resume();
    }

    fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.control.cancel();
    }
}

/// 立即成功的 Provider
pub(crate) struct InstantProvider;

#[async_trait]
impl Provider for InstantProvider {
    async fn upload(
        &self,
        file: UploadFile,
        progress: ProgressSink,
    ) -> Result<UploadResult, UploadError> {
        progress.report(file.size, Some(file.size), None);
        Ok(UploadResult {
            url: format!("https://bucket.example.com/{}", file.name),
        })
    }

    fn cancel(&self) {}
}

pub(crate) fn test_file(name: &str) -> UploadFile {
    UploadFile::new(name, format!("/tmp/{}", name), 1024)
}
