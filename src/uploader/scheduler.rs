// 上传任务调度器
//
// 功能：
// - 等待队列 FIFO，暂停的任务跳过但保留位置
// - 全局并发控制（运行中任务数不超过 max_concurrency）
// - 暂停/恢复/取消单个任务或全部任务
// - 清空队列时所有未结束任务以 Cancelled 结束，调用方不会永久等待
//
// 所有状态在一把同步锁内修改，锁从不跨 await 持有；
// 转发给 Provider 的提示、结果交付和新任务启动都在释放锁之后执行。
//
// 取消运行中的任务时不等待 Provider 确认停止就释放槽位，
// 被取消的请求可能在后端继续运行一段时间，同时槽位已被新任务占用。
// 本层没有超时，挂起的 Provider 会一直占用槽位。

use crate::uploader::task::TaskRecord;
use crate::uploader::{
    CancelReason, CompletedUpload, ProgressCallback, ProgressSink, Provider, TaskId, TaskOutcome,
    TaskSlot, TaskSnapshot, UploadError, UploadFile, UploadResult,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// 转发给 Provider 的提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderHint {
    Pause,
    Resume,
    Cancel,
}

/// 被调度进入运行集合的任务
struct Admission {
    task_id: TaskId,
    provider: Arc<dyn Provider>,
    file: UploadFile,
    progress: ProgressSink,
}

/// 锁内决策产生、锁外执行的副作用
#[derive(Default)]
struct Effects {
    hints: Vec<(Arc<dyn Provider>, ProviderHint)>,
    resolved: Vec<(TaskRecord, TaskOutcome)>,
    admitted: Option<Admission>,
}

impl Effects {
    fn apply(self, scheduler: &UploadScheduler) {
        for (provider, hint) in self.hints {
            match hint {
                ProviderHint::Pause => provider.pause(),
                ProviderHint::Resume => provider.resume(),
                ProviderHint::Cancel => provider.cancel(),
            }
        }
        for (record, outcome) in self.resolved {
            record.resolve(outcome);
        }
        if let Some(admission) = self.admitted {
            scheduler.execute(admission);
        }
    }
}

/// 调度器状态
///
/// `tasks` 是按 ID 索引的任务表，`slot` 字段标明所属集合；
/// `waiting` 只保存等待中任务的入队顺序。
struct SchedulerState {
    max_concurrency: usize,
    tasks: HashMap<TaskId, TaskRecord>,
    waiting: VecDeque<TaskId>,
    completed: Vec<CompletedUpload>,
}

impl SchedulerState {
    fn running_len(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.slot == TaskSlot::Running)
            .count()
    }

    /// 调度一次：最多把一个未暂停的等待任务移入运行集合
    fn schedule(&mut self) -> Option<Admission> {
        let running = self.running_len();
        if running >= self.max_concurrency {
            return None;
        }

        let tasks = &self.tasks;
        let position = self
            .waiting
            .iter()
            .position(|id| tasks.get(id).map_or(false, |t| !t.paused))?;
        let task_id = self.waiting.remove(position)?;
        let record = self.tasks.get_mut(&task_id)?;
        record.mark_running();

        info!(
            "启动上传任务: id={}, file={}, running={}/{}",
            task_id,
            record.file.name,
            running + 1,
            self.max_concurrency
        );

        Some(Admission {
            task_id,
            provider: record.provider.clone(),
            file: record.file.clone(),
            progress: record.progress.clone(),
        })
    }

    fn snapshots(&self) -> Vec<TaskSnapshot> {
        let mut running: Vec<TaskSnapshot> = self
            .tasks
            .values()
            .filter(|t| t.slot == TaskSlot::Running)
            .map(TaskRecord::snapshot)
            .collect();
        running.sort_by_key(|s| s.id);

        let waiting = self
            .waiting
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(TaskRecord::snapshot);

        running.extend(waiting);
        running
    }
}

struct SchedulerInner {
    next_id: AtomicU64,
    state: Mutex<SchedulerState>,
}

/// 上传任务调度器
#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl UploadScheduler {
    /// 创建调度器
    ///
    /// `max_concurrency` 为 0 时按 1 处理，否则没有任务能被调度
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = if max_concurrency == 0 {
            warn!("最大并发数不能为 0，已调整为 1");
            1
        } else {
            max_concurrency
        };

        info!("创建上传调度器: 最大并发数={}", max_concurrency);

        Self {
            inner: Arc::new(SchedulerInner {
                next_id: AtomicU64::new(0),
                state: Mutex::new(SchedulerState {
                    max_concurrency,
                    tasks: HashMap::new(),
                    waiting: VecDeque::new(),
                    completed: Vec::new(),
                }),
            }),
        }
    }

    /// 添加上传任务
    ///
    /// 立即分配任务ID，返回的 `PendingUpload` 调用 `start()` 后才进入等待队列
    pub fn add(
        &self,
        provider: Arc<dyn Provider>,
        file: UploadFile,
        on_progress: Option<ProgressCallback>,
    ) -> PendingUpload {
        let task_id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        debug!("添加上传任务: id={}, file={}, size={}", task_id, file.name, file.size);

        PendingUpload {
            task_id,
            scheduler: self.clone(),
            provider,
            file,
            progress: ProgressSink::new(task_id, on_progress),
        }
    }

    fn enqueue(&self, record: TaskRecord) {
        let effects = {
            let mut state = self.inner.state.lock();
            let task_id = record.id;
            state.tasks.insert(task_id, record);
            state.waiting.push_back(task_id);
            Effects {
                admitted: state.schedule(),
                ..Default::default()
            }
        };
        effects.apply(self);
    }

    /// 在 tokio 运行时上执行已调度的任务
    fn execute(&self, admission: Admission) {
        let Admission {
            task_id,
            provider,
            file,
            progress,
        } = admission;

        let mut guard = FinishGuard {
            scheduler: self.clone(),
            task_id,
            outcome: None,
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let outcome = provider.upload(file, progress).await;
                    guard.outcome = Some(outcome);
                    // guard 在此 drop，释放槽位并触发下一轮调度
                });
            }
            Err(e) => {
                // guard drop 时任务以失败结束
                error!("没有可用的 tokio 运行时，无法启动上传任务: id={}, 错误: {}", task_id, e);
            }
        }
    }

    /// 任务结束：移出运行集合、交付结果、调度下一个任务
    fn finish(&self, task_id: TaskId, outcome: TaskOutcome) {
        let effects = {
            let mut state = self.inner.state.lock();

            let is_running = state
                .tasks
                .get(&task_id)
                .map_or(false, |t| t.slot == TaskSlot::Running);
            if !is_running {
                // 已被取消或清空，结果早已交付
                debug!("忽略已结束任务的上传结果: id={}", task_id);
                return;
            }

            let record = match state.tasks.remove(&task_id) {
                Some(record) => record,
                None => return,
            };

            match &outcome {
                Ok(result) => {
                    info!("上传任务完成: id={}, url={}", task_id, result.url);
                    state.completed.push(CompletedUpload {
                        task_id,
                        file_name: record.file.name.clone(),
                        url: result.url.clone(),
                        started_at: record.started_at,
                        finished_at: Utc::now(),
                    });
                }
                Err(e) => warn!("上传任务失败: id={}, 错误: {}", task_id, e),
            }

            Effects {
                resolved: vec![(record, outcome)],
                admitted: state.schedule(),
                ..Default::default()
            }
        };
        effects.apply(self);
    }

    /// 取消指定任务
    ///
    /// 等待中的任务直接移除，不调用 Provider；
    /// 运行中的任务转发 cancel 后立即释放槽位并调度下一个任务。
    /// 任务不存在（已结束或从未启动）时返回 false。
    pub fn cancel(&self, task_id: TaskId) -> bool {
        let effects = {
            let mut state = self.inner.state.lock();
            let record = match state.tasks.remove(&task_id) {
                Some(record) => record,
                None => {
                    debug!("取消任务失败，任务不存在: id={}", task_id);
                    return false;
                }
            };

            let mut effects = Effects::default();
            match record.slot {
                TaskSlot::Waiting => {
                    state.waiting.retain(|id| *id != task_id);
                    info!("取消等待中的任务: id={}", task_id);
                }
                TaskSlot::Running => {
                    info!("取消运行中的任务: id={}", task_id);
                    effects
                        .hints
                        .push((record.provider.clone(), ProviderHint::Cancel));
                    effects.admitted = state.schedule();
                }
            }
            effects.resolved.push((
                record,
                Err(UploadError::Cancelled(CancelReason::User)),
            ));
            effects
        };
        effects.apply(self);
        true
    }

    /// 暂停指定任务
    ///
    /// 等待中的任务不会被调度；运行中的任务额外转发 pause 提示
    pub fn pause(&self, task_id: TaskId) -> bool {
        let effects = {
            let mut state = self.inner.state.lock();
            let record = match state.tasks.get_mut(&task_id) {
                Some(record) => record,
                None => return false,
            };

            record.paused = true;
            debug!("暂停任务: id={}, slot={:?}", task_id, record.slot);

            let mut effects = Effects::default();
            if record.slot == TaskSlot::Running {
                effects
                    .hints
                    .push((record.provider.clone(), ProviderHint::Pause));
            }
            effects
        };
        effects.apply(self);
        true
    }

    /// 恢复指定任务
    ///
    /// 任务不存在或未处于暂停状态时返回 false
    pub fn resume(&self, task_id: TaskId) -> bool {
        let effects = {
            let mut state = self.inner.state.lock();
            let record = match state.tasks.get_mut(&task_id) {
                Some(record) if record.paused => record,
                _ => return false,
            };

            record.paused = false;
            debug!("恢复任务: id={}, slot={:?}", task_id, record.slot);

            let mut effects = Effects::default();
            if record.slot == TaskSlot::Running {
                effects
                    .hints
                    .push((record.provider.clone(), ProviderHint::Resume));
            } else {
                effects.admitted = state.schedule();
            }
            effects
        };
        effects.apply(self);
        true
    }

    /// 暂停所有任务
    pub fn pause_all(&self) {
        let effects = {
            let mut state = self.inner.state.lock();
            let mut effects = Effects::default();
            for record in state.tasks.values_mut() {
                record.paused = true;
                if record.slot == TaskSlot::Running {
                    effects
                        .hints
                        .push((record.provider.clone(), ProviderHint::Pause));
                }
            }
            info!("暂停所有任务: 共 {} 个", state.tasks.len());
            effects
        };
        effects.apply(self);
    }

    /// 恢复所有任务并重新调度
    pub fn resume_all(&self) {
        let effects = {
            let mut state = self.inner.state.lock();
            let mut effects = Effects::default();
            for record in state.tasks.values_mut() {
                record.paused = false;
                if record.slot == TaskSlot::Running {
                    effects
                        .hints
                        .push((record.provider.clone(), ProviderHint::Resume));
                }
            }
            info!("恢复所有任务: 共 {} 个", state.tasks.len());
            effects.admitted = state.schedule();
            effects
        };
        effects.apply(self);
    }

    /// 清空队列
    ///
    /// 等待中的任务直接以 Cancelled 结束；运行中的任务先转发 cancel。
    /// 同时清空已完成任务记录。返回被取消的任务数。
    pub fn clear(&self) -> usize {
        let effects = {
            let mut state = self.inner.state.lock();
            let mut effects = Effects::default();

            let waiting: Vec<TaskId> = state.waiting.drain(..).collect();
            for task_id in waiting {
                if let Some(record) = state.tasks.remove(&task_id) {
                    effects.resolved.push((
                        record,
                        Err(UploadError::Cancelled(CancelReason::QueueCleared)),
                    ));
                }
            }

            let mut running: Vec<TaskRecord> = state.tasks.drain().map(|(_, r)| r).collect();
            running.sort_by_key(|r| r.id);
            for record in running {
                effects
                    .hints
                    .push((record.provider.clone(), ProviderHint::Cancel));
                effects.resolved.push((
                    record,
                    Err(UploadError::Cancelled(CancelReason::QueueCleared)),
                ));
            }

            state.completed.clear();
            info!("清空上传队列: 取消 {} 个任务", effects.resolved.len());
            effects
        };
        let cancelled = effects.resolved.len();
        effects.apply(self);
        cancelled
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.state.lock().max_concurrency
    }

    /// 运行中任务数
    pub fn running_len(&self) -> usize {
        self.inner.state.lock().running_len()
    }

    /// 等待中任务数
    pub fn waiting_len(&self) -> usize {
        self.inner.state.lock().waiting.len()
    }

    /// 获取任务快照（已结束的任务返回 None）
    pub fn snapshot(&self, task_id: TaskId) -> Option<TaskSnapshot> {
        self.inner
            .state
            .lock()
            .tasks
            .get(&task_id)
            .map(TaskRecord::snapshot)
    }

    /// 所有未结束任务：运行中的在前（按ID），等待中的按队列顺序
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.inner.state.lock().snapshots()
    }

    /// 已完成任务记录
    pub fn completed(&self) -> Vec<CompletedUpload> {
        self.inner.state.lock().completed.clone()
    }
}

impl std::fmt::Debug for UploadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("UploadScheduler")
            .field("max_concurrency", &state.max_concurrency)
            .field("running", &state.running_len())
            .field("waiting", &state.waiting.len())
            .field("completed", &state.completed.len())
            .finish()
    }
}

/// 任务结束守卫
///
/// 无论上传正常返回、panic 还是被运行时丢弃，drop 时都会结束任务并释放槽位
struct FinishGuard {
    scheduler: UploadScheduler,
    task_id: TaskId,
    outcome: Option<TaskOutcome>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let outcome = self
            .outcome
            .take()
            .unwrap_or_else(|| Err(UploadError::transfer("上传任务异常中止")));
        self.scheduler.finish(self.task_id, outcome);
    }
}

/// 已分配ID、尚未入队的上传任务
pub struct PendingUpload {
    task_id: TaskId,
    scheduler: UploadScheduler,
    provider: Arc<dyn Provider>,
    file: UploadFile,
    progress: ProgressSink,
}

impl PendingUpload {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// 入队并触发调度，返回任务结果的 future
    ///
    /// 消费自身，同一任务只会执行一次
    pub fn start(self) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        let record = TaskRecord::new(self.task_id, self.provider, self.file, self.progress, tx);
        self.scheduler.enqueue(record);

        TaskHandle {
            task_id: self.task_id,
            rx,
        }
    }
}

impl std::fmt::Debug for PendingUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingUpload")
            .field("task_id", &self.task_id)
            .field("file", &self.file)
            .finish()
    }
}

/// 任务结果句柄
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    rx: oneshot::Receiver<TaskOutcome>,
}

impl TaskHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl Future for TaskHandle {
    type Output = Result<UploadResult, UploadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // 发送端只会随调度器整体销毁而丢弃，按清空队列处理
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or(Err(UploadError::Cancelled(CancelReason::QueueCleared)))
        })
    }
}
