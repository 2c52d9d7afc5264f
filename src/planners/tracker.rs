//! Link 完成跟踪
//!
//! 每条 Link 一个 watch 通道；终态只能写入一次，wait 在所有 Link 进入终态后才返回。
//! MemoryOperation 基于 LinkTracker 实现 Operation，应用的 Link 通过 mpsc 交给执行方。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, RwLock};

use super::operation::{Operation, OperationState};
use crate::core::PlanningError;
use crate::objects::{Adversary, Agent, Fact, Link, LinkId, LinkStatus};

struct TrackedLink {
    link: Link,
    status_tx: watch::Sender<LinkStatus>,
}

/// Link 跟踪器
#[derive(Default)]
pub struct LinkTracker {
    links: RwLock<HashMap<LinkId, TrackedLink>>,
    /// 应用顺序
    order: RwLock<Vec<LinkId>>,
}

impl LinkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, link: Link) -> Result<LinkId, PlanningError> {
        let id = link.id.clone();
        let mut links = self.links.write().await;
        if links.contains_key(&id) {
            return Err(PlanningError::Apply {
                link: id,
                reason: "link already applied".into(),
            });
        }
        let (status_tx, _) = watch::channel(link.status);
        links.insert(id.clone(), TrackedLink { link, status_tx });
        self.order.write().await.push(id.clone());
        Ok(id)
    }

    /// 更新状态；已处于终态的 Link 拒绝再次变更
    pub async fn update(&self, id: &str, status: LinkStatus) -> Result<(), PlanningError> {
        let mut links = self.links.write().await;
        let tracked = links
            .get_mut(id)
            .ok_or_else(|| PlanningError::UnknownLink(id.to_string()))?;
        if tracked.link.status.is_terminal() {
            return Err(PlanningError::LinkAlreadyTerminal(id.to_string()));
        }
        tracked.link.status = status;
        tracked.status_tx.send_replace(status);
        Ok(())
    }

    pub async fn status(&self, id: &str) -> Option<LinkStatus> {
        self.links.read().await.get(id).map(|t| t.link.status)
    }

    pub async fn link(&self, id: &str) -> Option<Link> {
        self.links.read().await.get(id).map(|t| t.link.clone())
    }

    /// 按应用顺序返回所有 Link
    pub async fn links(&self) -> Vec<Link> {
        let links = self.links.read().await;
        self.order
            .read()
            .await
            .iter()
            .filter_map(|id| links.get(id).map(|t| t.link.clone()))
            .collect()
    }

    /// 等待所有 Link 进入终态
    pub async fn wait(&self, ids: &[LinkId]) -> Result<(), PlanningError> {
        let receivers = {
            let links = self.links.read().await;
            ids.iter()
                .map(|id| {
                    links
                        .get(id)
                        .map(|t| (id.clone(), t.status_tx.subscribe()))
                        .ok_or_else(|| PlanningError::UnknownLink(id.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        for (id, mut rx) in receivers {
            let finished = rx.wait_for(|s| s.is_terminal()).await.is_ok();
            if !finished {
                return Err(PlanningError::Wait(format!("link {} tracking dropped", id)));
            }
        }
        Ok(())
    }
}

/// 内存版作战
pub struct MemoryOperation {
    id: String,
    pub name: String,
    adversary: Adversary,
    agents: RwLock<Vec<Agent>>,
    facts: RwLock<Vec<Fact>>,
    state: RwLock<OperationState>,
    tracker: LinkTracker,
    applied_tx: mpsc::UnboundedSender<Link>,
}

impl MemoryOperation {
    /// 返回作战与已应用 Link 的接收端（交给执行方）
    pub fn new(
        name: impl Into<String>,
        adversary: Adversary,
        agents: Vec<Agent>,
    ) -> (Self, mpsc::UnboundedReceiver<Link>) {
        let (applied_tx, applied_rx) = mpsc::unbounded_channel();
        (
            Self {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.into(),
                adversary,
                agents: RwLock::new(agents),
                facts: RwLock::new(Vec::new()),
                state: RwLock::new(OperationState::Running),
                tracker: LinkTracker::new(),
                applied_tx,
            },
            applied_rx,
        )
    }

    pub async fn add_agent(&self, agent: Agent) {
        self.agents.write().await.push(agent);
    }

    pub async fn add_fact(&self, fact: Fact) {
        let mut facts = self.facts.write().await;
        if !facts.contains(&fact) {
            facts.push(fact);
        }
    }

    /// 执行方回报 Link 结果
    pub async fn complete(&self, link_id: &str, status: LinkStatus) -> Result<(), PlanningError> {
        self.tracker.update(link_id, status).await
    }

    pub async fn state(&self) -> OperationState {
        self.state.read().await.clone()
    }

    pub fn tracker(&self) -> &LinkTracker {
        &self.tracker
    }
}

#[async_trait]
impl Operation for MemoryOperation {
    fn id(&self) -> &str {
        &self.id
    }

    fn adversary(&self) -> &Adversary {
        &self.adversary
    }

    async fn agents(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }

    async fn apply(&self, link: Link) -> Result<LinkId, PlanningError> {
        if self.state.read().await.is_terminal() {
            return Err(PlanningError::Apply {
                link: link.id,
                reason: "operation is closed".into(),
            });
        }
        let id = self.tracker.track(link.clone()).await?;
        if self.applied_tx.send(link).is_err() {
            tracing::warn!(operation = %self.id, "No executor attached, link {} stays pending", id);
        }
        Ok(id)
    }

    async fn wait_for_links_completion(&self, link_ids: &[LinkId]) -> Result<(), PlanningError> {
        self.tracker.wait(link_ids).await
    }

    async fn facts(&self) -> Vec<Fact> {
        self.facts.read().await.clone()
    }

    async fn close(&self, state: OperationState) {
        tracing::info!(operation = %self.id, "Operation closed: {:?}", state);
        *self.state.write().await = state;
    }
}
