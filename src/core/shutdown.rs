//! 优雅关闭
//!
//! 统一的关闭令牌与信号监听；退出前依次执行注册的清理任务：
//! 中止当前推理 worker、停止 observer / pathfind-wait、报告队列中未被消费的条目。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::Orchestrator;
use crate::core::queue::{ActionQueue, DialogQueue};
use crate::core::side_task::SideTaskSupervisor;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或 /quit
    UserInitiated,
    /// SIGTERM
    Signal,
    /// stdin 关闭
    InputClosed,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 所有后台循环共享的关闭令牌
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.is_shutdown() {
            return;
        }
        tracing::info!(?reason, "Shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装 Ctrl+C 与 SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中的名称
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理，每项限时
pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup task '{}' completed successfully", name),
                Ok(Err(e)) => tracing::warn!("Cleanup task '{}' failed: {}", name, e),
                Err(_) => tracing::warn!(
                    "Cleanup task '{}' timed out after {}ms",
                    name,
                    self.timeout.as_millis()
                ),
            }
        }

        tracing::info!("All cleanup tasks finished");
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }
}

/// 中止正在进行的推理
pub struct OrchestratorCleanup {
    orchestrator: Arc<Orchestrator>,
}

impl OrchestratorCleanup {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for OrchestratorCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        if self.orchestrator.abort().await {
            tracing::info!("Aborted running inference");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Orchestrator"
    }
}

/// 停止 observer 与 pathfind-wait
pub struct SideTaskCleanup {
    side_tasks: Arc<SideTaskSupervisor>,
}

impl SideTaskCleanup {
    pub fn new(side_tasks: Arc<SideTaskSupervisor>) -> Self {
        Self { side_tasks }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SideTaskCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.side_tasks.shutdown().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SideTasks"
    }
}

/// 记录退出时仍未被客户端取走的条目
pub struct QueueReportCleanup {
    action_queue: Arc<ActionQueue>,
    dialog_queue: Arc<DialogQueue>,
}

impl QueueReportCleanup {
    pub fn new(action_queue: Arc<ActionQueue>, dialog_queue: Arc<DialogQueue>) -> Self {
        Self {
            action_queue,
            dialog_queue,
        }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for QueueReportCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let actions = self.action_queue.stats();
        let dialog = self.dialog_queue.stats();
        tracing::info!(
            pending_actions = self.action_queue.len(),
            pending_dialog = self.dialog_queue.len(),
            actions_dropped = actions.dropped,
            dialog_dropped = dialog.dropped,
            "Queues at shutdown"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "QueueReport"
    }
}
