//! 优雅关闭处理
//!
//! 收到 Ctrl+C / SIGTERM 或主循环结束时，依次执行注册的清理任务；
//! 编排器的清理会停止语音采集、取消轮询会话，避免宿主退出后仍有回调修改状态。

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::CommandHandle;

/// 关闭信号管理器：第一次触发的原因会被记录
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    /// 控制台 /quit 或标准输入结束
    UserInitiated,
    /// Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                tracing::info!("Shutdown requested: {:?}", reason);
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与 SIGTERM
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::Interrupt);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Terminate);
                }
            });
        }
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理，每项有超时
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout_secs: u64,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    tracing::info!("Cleanup task '{}' completed successfully", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Cleanup task '{}' failed: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "Cleanup task '{}' timed out after {}s",
                        name,
                        self.timeout_secs
                    );
                }
            }
        }

        tracing::info!("All cleanup tasks finished");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 编排器清理：停止采集与轮询并结束后台任务
pub struct OrchestratorCleanup {
    handle: CommandHandle,
}

impl OrchestratorCleanup {
    pub fn new(handle: CommandHandle) -> Self {
        Self { handle }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for OrchestratorCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        match self.handle.shutdown().await {
            // 已经退出也算清理完成
            Ok(()) | Err(crate::core::CommandError::Closed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "Orchestrator"
    }
}

/// 运行主应用直到结束或收到关闭信号，然后执行清理
pub async fn run_with_graceful_shutdown<F, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    tokio::select! {
        _ = app => {
            tracing::info!("Application finished normally");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received");
        }
    }

    cleanup().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedCommandApi;
    use crate::core::{spawn_orchestrator, CommandError, CommandState, OrchestratorSettings};
    use crate::speech::ManualCapture;

    #[test]
    fn test_first_shutdown_reason_wins() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());
        assert_eq!(manager.reason(), None);

        manager.shutdown(ShutdownReason::Terminate);
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert_eq!(manager.reason(), Some(ShutdownReason::Terminate));
    }

    #[tokio::test]
    async fn test_orchestrator_cleanup_tears_down_capture() {
        let capture = Arc::new(ManualCapture::new());
        let handle = spawn_orchestrator(
            Arc::new(SimulatedCommandApi::new()),
            capture.clone(),
            OrchestratorSettings::default(),
        );
        handle.start_capture().await.unwrap();
        assert_eq!(handle.snapshot().state, CommandState::Listening);

        let mut coordinator = ShutdownCoordinator::new().with_timeout(1);
        coordinator.register(OrchestratorCleanup::new(handle.clone()));
        coordinator.run_cleanup().await;

        assert!(!capture.is_active());
        assert_eq!(handle.snapshot().state, CommandState::Idle);
        // 第二次清理：编排器已退出，仍视为成功
        assert!(OrchestratorCleanup::new(handle.clone()).cleanup().await.is_ok());
        assert_eq!(handle.close().await, Err(CommandError::Closed));
    }
}
