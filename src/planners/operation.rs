//! 规划引擎依赖的协作方接口：Operation 与 PlanningService

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::PlanningError;
use crate::objects::{Adversary, Agent, Fact, Link, LinkId};

/// 作战状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    Running,
    /// 规划正常结束（链路耗尽或满足停止条件）
    Finished,
    /// 被用户或关闭信号取消
    Cancelled,
    /// 规划失败，携带原始错误
    Aborted(String),
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// 作战：参与的 Agent、攻击链，以及 Link 的应用与完成等待
#[async_trait]
pub trait Operation: Send + Sync {
    fn id(&self) -> &str;

    fn adversary(&self) -> &Adversary;

    /// 当前参与的 Agent（有序）
    async fn agents(&self) -> Vec<Agent>;

    /// 应用一条 Link，返回其 id
    async fn apply(&self, link: Link) -> Result<LinkId, PlanningError>;

    /// 阻塞直到所有 Link 进入终态；不得提前返回
    async fn wait_for_links_completion(&self, link_ids: &[LinkId]) -> Result<(), PlanningError>;

    /// 作战中已收集的事实（用于停止条件判断）
    async fn facts(&self) -> Vec<Fact>;

    async fn close(&self, state: OperationState);
}

/// 规划服务：给出某 Agent 当前可执行的候选 Link（已按能力 / 可用性过滤）
#[async_trait]
pub trait PlanningService: Send + Sync {
    async fn get_links(&self, operation: &dyn Operation, agent: &Agent) -> Result<Vec<Link>, PlanningError>;
}
