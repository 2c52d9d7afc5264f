//! TCP Contact：原始 TCP Socket 接入 Agent
//!
//! - 监听循环：accept → 握手（单行 JSON Profile）→ 协调服务生成 Agent → 注册会话 → 下发 paw
//! - 刷新任务：每 refresh_interval 对所有会话做一次存活探测
//! - BeaconLoop：每 beacon_interval 拉取并执行指令

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::beacon::BeaconLoop;
use super::channel::{ChannelConfig, InstructionChannel};
use super::service::ContactService;
use super::session::{Session, SessionId, SessionRegistry, Transport};
use crate::config::TcpSection;
use crate::core::shutdown::ShutdownCleanup;
use crate::core::ContactError;
use crate::objects::Heartbeat;

/// 本通道在 Agent 记录中的名字
pub const CONTACT_NAME: &str = "tcp";

pub struct TcpContact {
    config: TcpSection,
    registry: Arc<SessionRegistry>,
    channel: Arc<InstructionChannel>,
    service: Arc<dyn ContactService>,
    shutdown: CancellationToken,
}

impl TcpContact {
    pub fn new(config: TcpSection, service: Arc<dyn ContactService>, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let channel = Arc::new(InstructionChannel::new(
            Arc::clone(&registry),
            ChannelConfig {
                settle_delay: Duration::from_millis(config.settle_delay_ms),
                max_response_bytes: config.max_response_bytes,
            },
        ));
        Self {
            config,
            registry,
            channel,
            service,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<InstructionChannel> {
        &self.channel
    }

    /// 绑定监听地址并启动监听、刷新、Beacon 三个任务；返回实际监听地址
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ContactError> {
        let listener = TcpListener::bind(&self.config.bind).await?;
        let addr = listener.local_addr()?;
        tracing::info!("TCP contact listening on {}", addr);

        self.spawn_listener(listener);
        self.spawn_refresh();

        let beacon = BeaconLoop::new(
            Arc::clone(&self.channel),
            Arc::clone(&self.service),
            self.config.beacon_interval(),
        );
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { beacon.run(shutdown).await });

        Ok(addr)
    }

    fn spawn_listener(self: &Arc<Self>, listener: TcpListener) {
        let contact = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = contact.shutdown.cancelled() => break,
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                tracing::debug!("New TCP connection from {}", addr);
                                let contact = Arc::clone(&contact);
                                tokio::spawn(async move {
                                    let (reader, writer) = stream.into_split();
                                    contact.accept(reader, writer).await;
                                });
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                            }
                        }
                    }
                }
            }
            tracing::info!("TCP listener stopped");
        });
    }

    fn spawn_refresh(&self) {
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {
                        let removed = registry.refresh().await;
                        if !removed.is_empty() {
                            tracing::info!("Refresh removed sessions {:?}", removed);
                        }
                    }
                }
            }
        });
    }

    /// 处理一条新连接：握手失败静默放弃（只记 debug 日志），成功则恰好注册一个会话
    pub async fn accept<R, W>(&self, reader: R, writer: W) -> Option<SessionId>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut transport = Transport::new(reader, writer);
        let handshake_timeout = Duration::from_secs(self.config.handshake_timeout_secs);

        let profile = match tokio::time::timeout(
            handshake_timeout,
            transport.read_profile(self.config.max_handshake_bytes),
        )
        .await
        {
            Ok(Ok(profile)) => profile,
            Ok(Err(e)) => {
                tracing::debug!("Handshake failed: {}", e);
                return None;
            }
            Err(_) => {
                tracing::debug!("Handshake failed: {}", ContactError::Timeout(handshake_timeout));
                return None;
            }
        };

        let beat = Heartbeat::from_profile(profile, CONTACT_NAME);
        let agent = match self.service.handle_heartbeat(beat).await {
            Ok((agent, _)) => agent,
            Err(e) => {
                tracing::debug!("Handshake failed: {}", e);
                return None;
            }
        };

        let session = self.registry.register(Session::new(agent.paw.clone(), transport)).await;
        tracing::info!(session = session.id, paw = %agent.paw, "New TCP session registered");

        // 首条命令即 paw，让 Agent 获知自己的身份
        let reply = self.channel.send(session.id, &agent.paw, handshake_timeout).await;
        if !reply.is_success() {
            tracing::debug!(session = session.id, "Initial exchange failed: {}", reply.response);
        }
        Some(session.id)
    }
}

/// 关闭时断开所有会话
pub struct SessionCleanup {
    registry: Arc<SessionRegistry>,
}

impl SessionCleanup {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ShutdownCleanup for SessionCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let closed = self.registry.close_all().await;
        tracing::info!("Closed {} sessions", closed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Sessions"
    }
}
