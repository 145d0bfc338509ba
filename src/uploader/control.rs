//! 传输控制
//!
//! Provider 实现内嵌一个 `TransferControl` 来响应调度器转发的
//! 暂停/恢复/取消提示：在分片之间调用 `checkpoint()`，
//! 用 `until_cancelled()` 包住可能长时间挂起的网络请求。

use crate::uploader::{CancelReason, UploadError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    cancel_token: CancellationToken,
    is_paused: Arc<AtomicBool>,
    resumed: Arc<Notify>,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.is_paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        if self.is_paused.swap(false, Ordering::SeqCst) {
            self.resumed.notify_waiters();
        }
    }

    /// 幂等
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 等待被取消
    pub async fn cancelled(&self) {
        self.cancel_token.cancelled().await
    }

    /// 检查点：已取消返回 `Cancelled`，暂停中则挂起直到恢复或取消
    pub async fn checkpoint(&self) -> Result<(), UploadError> {
        loop {
            if self.is_cancelled() {
                return Err(UploadError::Cancelled(CancelReason::User));
            }
            if !self.is_paused() {
                return Ok(());
            }

            // 先登记等待再复查，避免错过 resume 的通知
            let notified = self.resumed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() || !self.is_paused() {
                continue;
            }

            tokio::select! {
                _ = notified => {}
                _ = self.cancel_token.cancelled() => {}
            }
        }
    }

    /// 运行 future，期间被取消则立即返回 `Cancelled`
    pub async fn until_cancelled<F>(&self, fut: F) -> Result<F::Output, UploadError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => Err(UploadError::Cancelled(CancelReason::User)),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkpoint_passes_when_running() {
        let control = TransferControl::new();
        assert!(control.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_while_paused() {
        let control = TransferControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.checkpoint().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("恢复后检查点应当放行")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_checkpoint() {
        let control = TransferControl::new();
        control.pause();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.checkpoint().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        control.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(UploadError::Cancelled(CancelReason::User)));
    }

    #[tokio::test]
    async fn test_until_cancelled() {
        let control = TransferControl::new();
        assert_eq!(control.until_cancelled(async { 42 }).await, Ok(42));

        let pending = {
            let control = control.clone();
            tokio::spawn(async move {
                control
                    .until_cancelled(std::future::pending::<()>())
                    .await
            })
        };
        control.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let control = TransferControl::new();
        control.resume();
        assert!(!control.is_paused());
        assert!(!control.is_cancelled());
    }
}
