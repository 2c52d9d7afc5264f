//! 优雅关闭
//!
//! 监听循环、刷新任务与 BeaconLoop 共享 ShutdownManager 的 token；收到 Ctrl+C / SIGTERM 后
//! token 被取消，各循环在当前工作单元结束后退出，随后 ShutdownCoordinator 依次执行清理
//! （断开所有 Agent 会话），每个清理任务有独立超时。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给长期运行的任务（监听、刷新、Beacon）
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown requested: {:?}", reason);
        }
        self.token.cancel();
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
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
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 日志中使用的名字
    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理任务；单个任务失败或超时不影响后续任务
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    /// 返回成功完成的任务数
    pub async fn run_cleanup(&self) -> usize {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());

        let mut completed = 0;
        for task in &self.cleanup_tasks {
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    completed += 1;
                    tracing::info!("Cleanup task '{}' completed", task.name());
                }
                Ok(Err(e)) => tracing::warn!("Cleanup task '{}' failed: {:#}", task.name(), e),
                Err(_) => tracing::warn!("Cleanup task '{}' timed out after {:?}", task.name(), self.timeout),
            }
        }
        completed
    }
}

/// 运行 app 直到其结束或收到关闭信号，然后执行 cleanup
pub async fn run_with_graceful_shutdown<F, Fut>(
    manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) where
    F: Future<Output = ()>,
    Fut: Future<Output = ()>,
{
    manager.install_signal_handlers();

    tokio::select! {
        _ = app => tracing::info!("Server finished"),
        _ = manager.wait_for_shutdown() => tracing::info!("Shutdown signal received"),
    }

    cleanup().await;
}
