//! Link 执行方：把作战应用的 Link 下发为 Agent 指令，并按回报结果完成 Link
//!
//! 每条 Link：标记 Running → 以 link.command 为 paw 排队一条指令 → 等待 BeaconLoop 回报结果。
//! status == 0 记为 Success，否则 Failed；输出中解析出的事实在完成前写入作战，供停止条件判断。
//! 超过 link_timeout 仍未下发的指令被撤回，Link 记为 Discarded；已下发但无结果的记为 Failed。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::tracker::MemoryOperation;
use crate::config::PlannerSection;
use crate::contact::MemoryContactService;
use crate::objects::{Link, LinkStatus};

pub struct LinkExecutor {
    operation: Arc<MemoryOperation>,
    service: Arc<MemoryContactService>,
    instruction_timeout_secs: u64,
    link_timeout: Duration,
}

impl LinkExecutor {
    pub fn new(operation: Arc<MemoryOperation>, service: Arc<MemoryContactService>, config: &PlannerSection) -> Self {
        Self {
            operation,
            service,
            instruction_timeout_secs: config.instruction_timeout_secs,
            link_timeout: Duration::from_secs(config.link_timeout_secs),
        }
    }

    /// 消费已应用的 Link，直到通道关闭或 cancel 被取消；每条 Link 独立执行
    pub async fn run(self: Arc<Self>, mut applied: mpsc::UnboundedReceiver<Link>, cancel: CancellationToken) {
        loop {
            let link = tokio::select! {
                _ = cancel.cancelled() => break,
                link = applied.recv() => match link {
                    Some(link) => link,
                    None => break,
                },
            };
            let executor = Arc::clone(&self);
            tokio::spawn(async move {
                executor.execute(link).await;
            });
        }
        tracing::debug!("Link executor stopped");
    }

    /// 执行一条 Link 并写入终态，返回该终态
    pub async fn execute(&self, link: Link) -> LinkStatus {
        if let Err(e) = self.operation.complete(&link.id, LinkStatus::Running).await {
            tracing::warn!("Cannot start link {}: {}", link.id, e);
            return link.status;
        }

        let (instruction_id, result_rx) = self
            .service
            .enqueue_tracked(&link.paw, &link.command, self.instruction_timeout_secs, 0)
            .await;
        tracing::debug!("Link {} queued as instruction {} for {}", link.id, instruction_id, link.paw);

        let status = match tokio::time::timeout(self.link_timeout, result_rx).await {
            Ok(Ok(result)) => {
                if let Some(output) = result.decoded_output() {
                    for fact in self.service.parsers().parse_all(&output) {
                        self.operation.add_fact(fact).await;
                    }
                }
                if result.status == 0 {
                    LinkStatus::Success
                } else {
                    tracing::debug!("Link {} failed with status {}", link.id, result.status);
                    LinkStatus::Failed
                }
            }
            Ok(Err(_)) => LinkStatus::Failed,
            Err(_) => {
                if self.service.withdraw(&link.paw, &instruction_id).await {
                    tracing::info!("Link {} was never picked up, discarding", link.id);
                    LinkStatus::Discarded
                } else {
                    tracing::warn!("Link {} got no result within {:?}", link.id, self.link_timeout);
                    LinkStatus::Failed
                }
            }
        };

        if let Err(e) = self.operation.complete(&link.id, status).await {
            tracing::warn!("Cannot complete link {}: {}", link.id, e);
        }
        status
    }
}
