//! 语音指令编排器：状态机主控循环
//!
//! 后台任务独占全部可变状态（当前阶段、转写文本、任务、轮询会话），并在一个 select 循环里消费：
//! 用户命令、采集事件、提交结果、轮询事件、展示定时器。每次转换后把快照发布到 watch 通道。
//!
//! 迟到消息的处理：
//! - 提交结果带 epoch，新的提交 / 取消 / 关闭都会递增 epoch，旧结果直接丢弃；
//! - 轮询事件带会话序号，只接受当前会话；
//! - 采集事件带采集序号，退订后的事件丢弃。
//!
//! 采集结束时读取的是此刻快照里的转写文本，而不是订阅时的值。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::api::{create_api_from_config, CommandApi};
use crate::command::{
    CommandSubmitter, FallbackPolicy, PollEvent, PollOptions, PollUpdate, PollingSession,
    StatusPoller, SubmissionOutcome,
};
use crate::config::{load_config, AppConfig};
use crate::core::{
    CommandError, CommandJob, CommandSnapshot, CommandState, ReportResult,
};
use crate::speech::{CaptureEvent, CaptureSignal, CaptureSink, SpeechCapture};

/// 从 UI 发往编排器的命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 打开交互，清空上一次的残留状态
    Open,
    /// 关闭交互：停止采集、取消轮询、回到 Idle
    Close,
    StartCapture,
    /// 停止采集并处理已转写的文本
    StopCapture,
    /// 直接提交文本（无需语音）
    ProcessText(String),
    CancelPolling,
    /// 宿主销毁：清理后退出后台任务
    Shutdown,
}

struct Request {
    command: Command,
    ack: oneshot::Sender<Result<(), CommandError>>,
}

/// 编排器行为参数
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub poll: PollOptions,
    /// 即时成功后 Generating → Success 的过渡时长
    pub reveal_delay: Duration,
    pub fallback: FallbackPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll: PollOptions::default(),
            reveal_delay: Duration::from_millis(800),
            fallback: FallbackPolicy::Permissive,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            poll: cfg.polling.poll_options(),
            reveal_delay: cfg.console.reveal_delay(),
            fallback: if cfg.console.strict_responses {
                FallbackPolicy::Strict
            } else {
                FallbackPolicy::Permissive
            },
        }
    }
}

/// 编排器句柄：命令方法在状态转换完成后才返回；可克隆
#[derive(Clone)]
pub struct CommandHandle {
    cmd_tx: mpsc::UnboundedSender<Request>,
    state_rx: watch::Receiver<CommandSnapshot>,
}

impl CommandHandle {
    async fn send(&self, command: Command) -> Result<(), CommandError> {
        let (ack, done) = oneshot::channel();
        self.cmd_tx
            .send(Request { command, ack })
            .map_err(|_| CommandError::Closed)?;
        done.await.map_err(|_| CommandError::Closed)?
    }

    pub async fn open(&self) -> Result<(), CommandError> {
        self.send(Command::Open).await
    }

    pub async fn close(&self) -> Result<(), CommandError> {
        self.send(Command::Close).await
    }

    /// 采集启动失败时返回对应的 Capture 错误（状态同时进入 Error）
    pub async fn start_capture(&self) -> Result<(), CommandError> {
        self.send(Command::StartCapture).await
    }

    pub async fn stop_capture(&self) -> Result<(), CommandError> {
        self.send(Command::StopCapture).await
    }

    /// 空白文本返回 InvalidInput，且不访问后端
    pub async fn process_text(&self, text: impl Into<String>) -> Result<(), CommandError> {
        self.send(Command::ProcessText(text.into())).await
    }

    pub async fn cancel_polling(&self) -> Result<(), CommandError> {
        self.send(Command::CancelPolling).await
    }

    /// 宿主销毁时调用；之后所有命令返回 Closed
    pub async fn shutdown(&self) -> Result<(), CommandError> {
        self.send(Command::Shutdown).await
    }

    pub fn snapshot(&self) -> CommandSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CommandSnapshot> {
        self.state_rx.clone()
    }
}

/// 启动编排器后台任务
pub fn spawn_orchestrator(
    api: Arc<dyn CommandApi>,
    capture: Arc<dyn SpeechCapture>,
    settings: OrchestratorSettings,
) -> CommandHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Request>();
    let (state_tx, state_rx) = watch::channel(CommandSnapshot::default());
    let (capture_tx, capture_rx) = mpsc::unbounded_channel::<CaptureSignal>();
    let (poll_tx, poll_rx) = mpsc::unbounded_channel::<PollUpdate>();
    let (submit_tx, submit_rx) = mpsc::unbounded_channel::<Submitted>();

    let orchestrator = Orchestrator {
        submitter: Arc::new(CommandSubmitter::new(api.clone()).with_fallback(settings.fallback)),
        poller: StatusPoller::new(api),
        capture,
        settings,
        state_tx,
        snapshot: CommandSnapshot::default(),
        epoch: 0,
        capture_seq: 0,
        capture_id: None,
        session: None,
        reveal: None,
        capture_tx,
        poll_tx,
        submit_tx,
    };
    tokio::spawn(orchestrator.run(cmd_rx, capture_rx, poll_rx, submit_rx));

    CommandHandle { cmd_tx, state_rx }
}

/// 加载配置、按配置创建后端并启动编排器
pub fn create_orchestrator(
    config_path: Option<PathBuf>,
    capture: Arc<dyn SpeechCapture>,
) -> CommandHandle {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let api = create_api_from_config(&cfg.backend);
    spawn_orchestrator(api, capture, OrchestratorSettings::from_config(&cfg))
}

/// 提交任务的结果，epoch 标识所属的提交
struct Submitted {
    epoch: u64,
    outcome: Result<SubmissionOutcome, CommandError>,
}

/// 等待展示的即时成功结果
struct PendingReveal {
    deadline: Instant,
    result: ReportResult,
}

struct Orchestrator {
    submitter: Arc<CommandSubmitter>,
    poller: StatusPoller,
    capture: Arc<dyn SpeechCapture>,
    settings: OrchestratorSettings,
    state_tx: watch::Sender<CommandSnapshot>,
    /// 唯一权威状态
    snapshot: CommandSnapshot,
    epoch: u64,
    capture_seq: u64,
    /// 当前订阅中的采集序号
    capture_id: Option<u64>,
    session: Option<PollingSession>,
    reveal: Option<PendingReveal>,
    capture_tx: mpsc::UnboundedSender<CaptureSignal>,
    poll_tx: mpsc::UnboundedSender<PollUpdate>,
    submit_tx: mpsc::UnboundedSender<Submitted>,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<Request>,
        mut capture_rx: mpsc::UnboundedReceiver<CaptureSignal>,
        mut poll_rx: mpsc::UnboundedReceiver<PollUpdate>,
        mut submit_rx: mpsc::UnboundedReceiver<Submitted>,
    ) {
        loop {
            let reveal_at = self.reveal.as_ref().map(|r| r.deadline);
            tokio::select! {
                request = requests.recv() => {
                    // 所有句柄都已释放，等同于宿主销毁
                    let Some(Request { command, ack }) = request else { break };
                    let shutdown = command == Command::Shutdown;
                    let result = self.handle(command);
                    let _ = ack.send(result);
                    if shutdown {
                        break;
                    }
                }
                Some(signal) = capture_rx.recv() => self.on_capture(signal),
                Some(update) = poll_rx.recv() => self.on_poll(update),
                Some(done) = submit_rx.recv() => self.on_submitted(done),
                _ = tokio::time::sleep_until(reveal_at.unwrap_or_else(Instant::now)),
                    if reveal_at.is_some() =>
                {
                    self.reveal_result();
                }
            }
        }
        self.reset();
        tracing::info!("Voice command orchestrator stopped");
    }

    fn handle(&mut self, command: Command) -> Result<(), CommandError> {
        match command {
            Command::Open => {
                self.open();
                Ok(())
            }
            Command::Close | Command::CancelPolling | Command::Shutdown => {
                self.reset();
                Ok(())
            }
            Command::StartCapture => self.start_capture(),
            Command::StopCapture => {
                self.stop_capture();
                Ok(())
            }
            Command::ProcessText(text) => self.process_text(&text),
        }
    }

    fn state(&self) -> CommandState {
        self.snapshot.state
    }

    /// 发布快照；与上一次相同则不通知观察者
    fn publish(&self) {
        let next = self.snapshot.clone();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    /// 使在途提交、轮询会话、待展示结果全部失效
    fn cancel_inflight(&mut self) {
        self.epoch += 1;
        if let Some(mut session) = self.session.take() {
            session.cancel();
        }
        self.reveal = None;
    }

    fn stop_active_capture(&mut self) {
        if self.capture_id.take().is_some() {
            self.capture.stop();
        }
        self.snapshot.is_capturing = false;
    }

    /// 任意状态 → Idle，清空全部临时字段；重复调用不会产生新的状态转换
    fn reset(&mut self) {
        self.stop_active_capture();
        self.cancel_inflight();
        if self.snapshot != CommandSnapshot::default() {
            tracing::info!("Voice command reset from {:?}", self.state());
        }
        self.snapshot = CommandSnapshot::default();
        self.publish();
    }

    fn open(&mut self) {
        match self.state() {
            // 终态也可重新打开，等价于先 close 再 open
            CommandState::Idle | CommandState::Success | CommandState::Error => self.reset(),
            other => tracing::debug!("open() ignored while {:?}", other),
        }
    }

    fn start_capture(&mut self) -> Result<(), CommandError> {
        match self.state() {
            CommandState::Listening => return Ok(()),
            CommandState::Processing | CommandState::Generating => {
                tracing::debug!("start_capture() ignored while {:?}", self.state());
                return Ok(());
            }
            // 从终态直接开始新一轮采集，旧的结果与错误随之清空
            CommandState::Idle | CommandState::Success | CommandState::Error => {}
        }

        self.cancel_inflight();
        self.snapshot = CommandSnapshot::default();

        self.capture_seq += 1;
        let capture_id = self.capture_seq;
        match self
            .capture
            .start(CaptureSink::new(capture_id, self.capture_tx.clone()))
        {
            Ok(()) => {
                tracing::info!(capture = capture_id, "Speech capture started");
                self.capture_id = Some(capture_id);
                self.snapshot.state = CommandState::Listening;
                self.snapshot.is_capturing = true;
                self.publish();
                Ok(())
            }
            Err(code) => {
                tracing::warn!("Speech capture failed to start: {}", code);
                let err = CommandError::Capture(code);
                self.fail(&err, None);
                Err(err)
            }
        }
    }

    fn stop_capture(&mut self) {
        if self.state() != CommandState::Listening || self.capture_id.is_none() {
            return;
        }
        self.stop_active_capture();
        self.finish_capture();
    }

    fn on_capture(&mut self, signal: CaptureSignal) {
        if self.capture_id != Some(signal.capture_id) || self.state() != CommandState::Listening {
            tracing::debug!(capture = signal.capture_id, "Discarding stale capture event");
            return;
        }
        match signal.event {
            CaptureEvent::Started => {}
            CaptureEvent::Transcript { text, .. } => {
                self.snapshot.transcribed_text = text;
                self.publish();
            }
            CaptureEvent::Error(code) => {
                tracing::warn!("Speech capture error: {}", code);
                self.stop_active_capture();
                self.fail(&CommandError::Capture(code), None);
            }
            CaptureEvent::Ended => {
                self.stop_active_capture();
                self.finish_capture();
            }
        }
    }

    /// 采集结束：读取当前转写文本，非空则提交
    fn finish_capture(&mut self) {
        let text = self.snapshot.transcribed_text.trim().to_string();
        if text.is_empty() {
            tracing::info!("Speech capture ended without a transcript");
            self.snapshot = CommandSnapshot::default();
            self.publish();
            return;
        }
        self.begin_submission(text);
    }

    fn process_text(&mut self, text: &str) -> Result<(), CommandError> {
        self.stop_active_capture();
        let text = text.trim();
        if text.is_empty() {
            self.cancel_inflight();
            self.fail(&CommandError::InvalidInput, None);
            return Err(CommandError::InvalidInput);
        }
        self.begin_submission(text.to_string());
        Ok(())
    }

    fn begin_submission(&mut self, text: String) {
        self.cancel_inflight();

        let job = CommandJob::new(text.clone());
        tracing::info!(command = %job.local_id, "Submitting voice command: {}", text);
        self.snapshot = CommandSnapshot {
            state: CommandState::Processing,
            transcribed_text: text.clone(),
            job: Some(job),
            ..CommandSnapshot::default()
        };
        self.publish();

        let epoch = self.epoch;
        let submitter = self.submitter.clone();
        let submit_tx = self.submit_tx.clone();
        tokio::spawn(async move {
            let outcome = submitter.submit(&text).await;
            let _ = submit_tx.send(Submitted { epoch, outcome });
        });
    }

    fn on_submitted(&mut self, done: Submitted) {
        if done.epoch != self.epoch || self.state() != CommandState::Processing {
            tracing::debug!(epoch = done.epoch, "Discarding stale submission result");
            return;
        }

        match done.outcome {
            Err(err) => self.fail(&err, None),
            Ok(SubmissionOutcome::ImmediateFailure {
                message,
                field_errors,
            }) => {
                let result = ReportResult::failed(None, message.clone(), field_errors.clone());
                self.fail(
                    &CommandError::SubmissionFailure {
                        message,
                        field_errors,
                    },
                    Some(result),
                );
            }
            Ok(SubmissionOutcome::ImmediateSuccess(result)) => {
                self.snapshot.state = CommandState::Generating;
                self.publish();
                self.reveal = Some(PendingReveal {
                    deadline: Instant::now() + self.settings.reveal_delay,
                    result,
                });
            }
            Ok(SubmissionOutcome::Deferred { job_id, message }) => {
                if let Some(job) = self.snapshot.job.as_mut() {
                    job.id = Some(job_id.clone());
                }
                if let Some(mut previous) = self.session.take() {
                    previous.cancel();
                }
                self.session = Some(self.poller.start(
                    job_id,
                    self.settings.poll,
                    self.poll_tx.clone(),
                ));
                self.snapshot.progress_message = message;
                self.snapshot.is_polling = true;
                self.snapshot.polling_attempts = 0;
                self.publish();
            }
        }
    }

    fn on_poll(&mut self, update: PollUpdate) {
        let current = self.session.as_ref().map(PollingSession::id);
        if current != Some(update.session_id) || self.state() != CommandState::Processing {
            tracing::debug!(
                job_id = %update.job_id,
                session = update.session_id,
                "Discarding stale poll update"
            );
            return;
        }

        match update.event {
            PollEvent::Attempt { attempt } => {
                self.snapshot.polling_attempts = attempt;
                self.publish();
            }
            PollEvent::Completed(result) => {
                self.session = None;
                tracing::info!(job_id = %update.job_id, "Report ready");
                self.succeed(result);
            }
            PollEvent::Failed(err) => {
                self.session = None;
                let result = match &err {
                    CommandError::JobFailure {
                        job_id,
                        message,
                        field_errors,
                    } => Some(ReportResult::failed(
                        Some(job_id.clone()),
                        message.clone(),
                        field_errors.clone(),
                    )),
                    _ => None,
                };
                self.fail(&err, result);
            }
        }
    }

    fn reveal_result(&mut self) {
        let Some(pending) = self.reveal.take() else {
            return;
        };
        if self.state() == CommandState::Generating {
            self.succeed(pending.result);
        }
    }

    fn succeed(&mut self, result: ReportResult) {
        self.snapshot.state = CommandState::Success;
        self.snapshot.result = Some(result);
        self.snapshot.error = None;
        self.snapshot.error_details = None;
        self.snapshot.is_polling = false;
        self.snapshot.progress_message = None;
        self.snapshot.job = None;
        self.publish();
    }

    fn fail(&mut self, err: &CommandError, result: Option<ReportResult>) {
        let record = err.to_record();
        tracing::info!("Voice command failed: {}", record.message);
        self.snapshot.state = CommandState::Error;
        self.snapshot.error = Some(record.message);
        self.snapshot.error_details = record.field_errors;
        self.snapshot.result = result;
        self.snapshot.is_capturing = false;
        self.snapshot.is_polling = false;
        self.snapshot.progress_message = None;
        self.snapshot.job = None;
        self.publish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{SimulatedCommandApi, StatusResponse, SubmitResponse};
    use crate::speech::ManualCapture;

    fn spawn(api: &Arc<SimulatedCommandApi>, capture: &Arc<ManualCapture>) -> CommandHandle {
        spawn_orchestrator(api.clone(), capture.clone(), OrchestratorSettings::default())
    }

    async fn wait_state(handle: &CommandHandle, state: CommandState) -> CommandSnapshot {
        let mut rx = handle.subscribe();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(120),
            rx.wait_for(|s| s.state == state),
        )
        .await
        .expect("timed out waiting for state")
        .expect("orchestrator dropped")
        .clone();
        snapshot
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_passes_through_generating() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.reply_submit(SubmitResponse {
            file_url: Some("https://x/a.pdf".into()),
            ..SubmitResponse::with_status("EXECUTED")
        });
        let handle = spawn(&api, &Arc::new(ManualCapture::new()));
        let mut rx = handle.subscribe();

        handle.process_text("generate sales report").await.unwrap();
        assert_eq!(handle.snapshot().state, CommandState::Processing);

        let generating = rx
            .wait_for(|s| s.state == CommandState::Generating)
            .await
            .unwrap()
            .clone();
        assert!(generating.result.is_none());

        let done = wait_state(&handle, CommandState::Success).await;
        assert_eq!(
            done.result.unwrap().file_url.as_deref(),
            Some("https://x/a.pdf")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_generating_drops_result() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.reply_submit(SubmitResponse::with_status("EXECUTED"));
        let handle = spawn(&api, &Arc::new(ManualCapture::new()));

        handle.process_text("report").await.unwrap();
        wait_state(&handle, CommandState::Generating).await;
        handle.close().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.snapshot(), CommandSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_job_records_id_and_progress() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.reply_submit(SubmitResponse {
            id: Some(serde_json::json!("J1")),
            message: Some("Working on it".into()),
            ..SubmitResponse::with_status("PROCESSING")
        });
        let gate = Arc::new(tokio::sync::Notify::new());
        api.push_status(
            "J1",
            crate::api::Scripted::Gated(gate.clone(), StatusResponse::executed("https://x/b.pdf")),
        );
        let handle = spawn(&api, &Arc::new(ManualCapture::new()));
        let mut rx = handle.subscribe();

        handle.process_text("long report").await.unwrap();
        let polling = rx
            .wait_for(|s| s.is_polling && s.polling_attempts == 1)
            .await
            .unwrap()
            .clone();
        assert_eq!(polling.state, CommandState::Processing);
        assert_eq!(polling.progress_message.as_deref(), Some("Working on it"));
        let job = polling.job.unwrap();
        assert_eq!(job.id.unwrap().as_str(), "J1");
        assert_eq!(job.submitted_text, "long report");

        gate.notify_one();
        let done = wait_state(&handle, CommandState::Success).await;
        assert!(!done.is_polling);
        assert!(done.job.is_none());
        assert!(done.progress_message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_capture_ignored_while_processing() {
        let api = Arc::new(SimulatedCommandApi::new());
        api.reply_submit(SubmitResponse {
            id: Some(serde_json::json!("J1")),
            ..SubmitResponse::with_status("PROCESSING")
        });
        api.reply_status("J1", StatusResponse::processing());
        let capture = Arc::new(ManualCapture::new());
        let handle = spawn(&api, &capture);

        handle.process_text("report").await.unwrap();
        handle.start_capture().await.unwrap();

        assert_eq!(handle.snapshot().state, CommandState::Processing);
        assert!(!capture.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_clears_previous_attempt() {
        let api = Arc::new(SimulatedCommandApi::new());
        let handle = spawn(&api, &Arc::new(ManualCapture::new()));

        assert_eq!(handle.process_text("  ").await, Err(CommandError::InvalidInput));
        assert_eq!(handle.snapshot().state, CommandState::Error);

        handle.open().await.unwrap();
        assert_eq!(handle.snapshot(), CommandSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_capture_from_error_clears_it() {
        let api = Arc::new(SimulatedCommandApi::new());
        let capture = Arc::new(ManualCapture::new());
        let handle = spawn(&api, &capture);

        assert_eq!(handle.process_text("").await, Err(CommandError::InvalidInput));
        assert_eq!(handle.snapshot().state, CommandState::Error);

        handle.start_capture().await.unwrap();
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, CommandState::Listening);
        assert!(snapshot.error.is_none());
        assert!(capture.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_capture_returns_to_idle() {
        let api = Arc::new(SimulatedCommandApi::new());
        let capture = Arc::new(ManualCapture::new());
        let handle = spawn(&api, &capture);

        handle.start_capture().await.unwrap();
        assert_eq!(handle.snapshot().state, CommandState::Listening);
        capture.transcript("   ", false);
        capture.end();

        wait_state(&handle, CommandState::Idle).await;
        assert_eq!(api.submit_calls(), 0);
        assert!(!handle.snapshot().is_capturing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_fail_after_shutdown() {
        let api = Arc::new(SimulatedCommandApi::new());
        let capture = Arc::new(ManualCapture::new());
        let handle = spawn(&api, &capture);

        handle.start_capture().await.unwrap();
        handle.shutdown().await.unwrap();
        assert!(!capture.is_active());

        // 等后台任务退出
        tokio::task::yield_now().await;
        assert_eq!(handle.open().await, Err(CommandError::Closed));
    }
}
