//! Emu - 对抗模拟 C2 服务端
//!
//! 入口：初始化日志、加载配置、启动 TCP Contact，并在收到关闭信号后断开所有会话。

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use emu::config::load_config;
use emu::contact::{MemoryContactService, SessionCleanup, TcpContact};
use emu::core::shutdown::run_with_graceful_shutdown;
use emu::core::{ShutdownCoordinator, ShutdownManager};
use emu::planners::PLANNERS;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    emu::observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    anyhow::ensure!(
        PLANNERS.contains(&cfg.planner.name.as_str()),
        "Unknown planner: {}",
        cfg.planner.name
    );
    let manager = Arc::new(ShutdownManager::new());

    let service = Arc::new(MemoryContactService::default());
    let contact = Arc::new(TcpContact::new(cfg.contact.tcp.clone(), service, manager.token()));
    let addr = contact
        .start()
        .await
        .context("Failed to start TCP contact")?;
    tracing::info!(
        "{} ready on {} (planner: {})",
        cfg.app.name.as_deref().unwrap_or("emu"),
        addr,
        cfg.planner.name
    );

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(cfg.app.shutdown_timeout_secs));
    coordinator.register(SessionCleanup::new(Arc::clone(contact.registry())));

    run_with_graceful_shutdown(manager, std::future::pending::<()>(), move || async move {
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}
