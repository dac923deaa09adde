//! 任务状态轮询：指数退避、次数上限、总时长上限、可取消
//!
//! 每次 start 生成一个 PollingSession，由调用方（编排器）持有；会话在后台任务里串行查询：
//! 上一次查询返回之后才安排下一次，因此同一会话内不会有重叠请求，次数可确定。
//! 取消基于 CancellationToken：取消后即使在途请求返回，也不会再发出任何事件。

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{status_kind, CommandApi, StatusKind, StatusResponse};
use crate::core::{CommandError, JobId, ReportResult};

/// 轮询预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// 单次退避上限
    pub max_delay: Duration,
    pub max_total: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_total: Duration::from_millis(60_000),
        }
    }
}

/// 第 attempt 次查询（从 1 开始）仍处理中时，到下一次查询的等待：min(base * 2^(attempt-1), cap)
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

/// 会话发出的事件
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// 即将发出第 attempt 次查询
    Attempt { attempt: u32 },
    Completed(ReportResult),
    /// 终止：任务失败 / 超时 / 状态查询失败
    Failed(CommandError),
}

/// 带会话序号的事件，接收方据此丢弃旧会话的消息
#[derive(Debug, Clone, PartialEq)]
pub struct PollUpdate {
    pub session_id: u64,
    pub job_id: JobId,
    pub event: PollEvent,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 一次轮询会话；Drop 时自动取消
#[derive(Debug)]
pub struct PollingSession {
    id: u64,
    job_id: JobId,
    attempt: Arc<AtomicU32>,
    cancel: CancellationToken,
    started_at: Instant,
    task: JoinHandle<()>,
}

impl PollingSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// 已发出的查询次数
    pub fn attempts(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 会话取消令牌的克隆，用于在会话被丢弃后仍能检查其状态
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 后台任务是否已真正退出（取消后仍需等待任务被回收）
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 取消会话并清除挂起的定时器；可重复调用
    pub fn cancel(&mut self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(job_id = %self.job_id, session = self.id, "Polling session cancelled");
        }
        self.cancel.cancel();
        self.task.abort();
    }
}

impl Drop for PollingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// 状态轮询器：无跨调用状态，每次 start 返回一个新会话
#[derive(Clone)]
pub struct StatusPoller {
    api: Arc<dyn CommandApi>,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn CommandApi>) -> Self {
        Self { api }
    }

    /// 开始轮询；第一次查询立即发出
    ///
    /// 同一调用方若已有会话，应先 cancel 旧会话再调用（编排器在 start 前完成这一步）。
    pub fn start(
        &self,
        job_id: JobId,
        options: PollOptions,
        updates: mpsc::UnboundedSender<PollUpdate>,
    ) -> PollingSession {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let attempt = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let started_at = Instant::now();

        let worker = PollWorker {
            api: self.api.clone(),
            session_id: id,
            job_id: job_id.clone(),
            options,
            attempt: attempt.clone(),
            cancel: cancel.clone(),
            started_at,
            updates,
        };
        let task = tokio::spawn(worker.run());

        tracing::info!(job_id = %job_id, session = id, "Polling started");
        PollingSession {
            id,
            job_id,
            attempt,
            cancel,
            started_at,
            task,
        }
    }
}

struct PollWorker {
    api: Arc<dyn CommandApi>,
    session_id: u64,
    job_id: JobId,
    options: PollOptions,
    attempt: Arc<AtomicU32>,
    cancel: CancellationToken,
    started_at: Instant,
    updates: mpsc::UnboundedSender<PollUpdate>,
}

impl PollWorker {
    async fn run(self) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            self.attempt.store(attempt, Ordering::SeqCst);
            if !self.emit(PollEvent::Attempt { attempt }) {
                return;
            }

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return,
                r = self.api.job_status(&self.job_id) => r,
            };
            // 在途请求返回前已取消：丢弃结果
            if self.cancel.is_cancelled() {
                return;
            }

            let status = match response {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, "Status query failed: {}", e);
                    self.emit(PollEvent::Failed(CommandError::PollingTransport {
                        job_id: self.job_id.clone(),
                        reason: e.to_string(),
                    }));
                    return;
                }
            };

            match classify_status(&self.job_id, status) {
                PollStep::Done(event) => {
                    self.emit(event);
                    return;
                }
                PollStep::Pending => {}
            }

            let elapsed = self.started_at.elapsed();
            if attempt >= self.options.max_attempts || elapsed > self.options.max_total {
                tracing::warn!(
                    job_id = %self.job_id,
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Polling budget exhausted"
                );
                self.emit(PollEvent::Failed(CommandError::PollingTimeout {
                    job_id: self.job_id.clone(),
                }));
                return;
            }

            let delay = backoff_delay(attempt, self.options.base_delay, self.options.max_delay);
            tracing::debug!(
                job_id = %self.job_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Job still processing"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 发出事件；会话已取消或接收方已退出时返回 false
    fn emit(&self, event: PollEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.updates
            .send(PollUpdate {
                session_id: self.session_id,
                job_id: self.job_id.clone(),
                event,
            })
            .is_ok()
    }
}

enum PollStep {
    Done(PollEvent),
    Pending,
}

/// 失败优先：显式失败状态或错误信息即终止；其次成功状态或带 file_url；其余视为仍在处理
fn classify_status(job_id: &JobId, status: StatusResponse) -> PollStep {
    let kind = status_kind(status.status.as_deref());

    if kind == StatusKind::Failure || status.explicit_error().is_some() {
        let message = status
            .explicit_error()
            .or(status.message.as_deref())
            .unwrap_or("Report generation failed.")
            .to_string();
        return PollStep::Done(PollEvent::Failed(CommandError::JobFailure {
            job_id: job_id.clone(),
            message,
            field_errors: status.details,
        }));
    }

    if kind == StatusKind::Success || status.file_url.is_some() {
        let result = ReportResult::executed(Some(job_id.clone()), status.file_url)
            .with_result_data(status.result_data);
        return PollStep::Done(PollEvent::Completed(result));
    }

    PollStep::Pending
}
