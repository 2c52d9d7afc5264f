//! BeaconLoop：按固定节拍驱动会话
//!
//! 每个节拍：刷新注册表 → 对每个存活会话向协调服务拉取指令 → 依次发送、回报结果、按指令间隔休眠。
//! 单条指令的错误只记录日志并跳过该指令；会话之间并发处理，同一会话内严格串行。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use super::channel::InstructionChannel;
use super::service::ContactService;
use super::session::Session;
use crate::core::ContactError;
use crate::objects::{Heartbeat, Instruction, InstructionResult};

pub struct BeaconLoop {
    channel: Arc<InstructionChannel>,
    service: Arc<dyn ContactService>,
    interval: Duration,
}

impl BeaconLoop {
    pub fn new(channel: Arc<InstructionChannel>, service: Arc<dyn ContactService>, interval: Duration) -> Self {
        Self {
            channel,
            service,
            interval,
        }
    }

    /// 运行直到 shutdown 被取消；正在处理的节拍会完整执行
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("Beacon loop started (interval {:?})", self.interval);
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let processed = self.beat().await;
            if processed > 0 {
                tracing::debug!("Beacon tick processed {} instructions", processed);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Beacon loop stopped");
    }

    /// 执行一个节拍，返回成功处理的指令数
    pub async fn beat(&self) -> usize {
        let removed = self.channel.registry().refresh().await;
        if !removed.is_empty() {
            tracing::info!("Removed {} dead sessions", removed.len());
        }

        let sessions = self.channel.registry().sessions().await;
        join_all(sessions.iter().map(|s| self.serve_session(s)))
            .await
            .into_iter()
            .sum()
    }

    async fn serve_session(&self, session: &Session) -> usize {
        let instructions = match self.service.handle_heartbeat(Heartbeat::poll(&session.paw)).await {
            Ok((_, instructions)) => instructions,
            Err(e) => {
                tracing::warn!(session = session.id, "Failed to fetch instructions: {}", e);
                return 0;
            }
        };

        let mut processed = 0;
        for instruction in instructions {
            tracing::debug!("TCP instruction: {}", instruction.id);
            match self.run_instruction(session, &instruction).await {
                Ok(()) => processed += 1,
                Err(e) => tracing::debug!("[-] operation exception: {}", e),
            }
        }
        processed
    }

    async fn run_instruction(&self, session: &Session, instruction: &Instruction) -> Result<(), ContactError> {
        let command = instruction.decode_command()?;
        let reply = self
            .channel
            .send(session.id, &command, Duration::from_secs(instruction.timeout))
            .await;
        let result = InstructionResult::new(
            instruction.id.clone(),
            &reply.response,
            reply.status,
            reply.agent_reported_time,
        );
        self.service
            .handle_heartbeat(Heartbeat::report(&session.paw, result))
            .await?;
        tokio::time::sleep(Duration::from_secs(instruction.sleep)).await;
        Ok(())
    }
}
