//! Atomic 规划策略：严格按 Adversary 攻击链顺序逐步执行
//!
//! 只有一个自重复的 bucket（atomic）。每轮：为每个 Agent 取候选 Link，用各自游标在攻击链上选出
//! 下一条，全部应用后等待完成，再重复本 bucket；一轮下来没有任何 Link 被应用则终止。
//! 攻击链耗尽的 Agent 退出跟踪，本次作战内不再考虑。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use super::driver::{BucketOutcome, Planner};
use super::operation::{Operation, PlanningService};
use super::selector::LinkSelector;
use crate::core::PlanningError;
use crate::objects::{Fact, LinkId};

pub const ATOMIC_BUCKET: &str = "atomic";

/// 规划器状态：每个 bucket 迭代修改一次
#[derive(Debug, Clone)]
pub struct PlannerState {
    pub next_bucket: BucketOutcome,
    pub stopping_conditions: Vec<Fact>,
    /// paw -> 攻击链游标（单调不减）
    cursors: HashMap<String, usize>,
    /// 已耗尽攻击链的 Agent
    retired: HashSet<String>,
}

impl PlannerState {
    fn new(stopping_conditions: Vec<Fact>) -> Self {
        Self {
            next_bucket: BucketOutcome::Continue(ATOMIC_BUCKET.to_string()),
            stopping_conditions,
            cursors: HashMap::new(),
            retired: HashSet::new(),
        }
    }
}

pub struct AtomicPlanner {
    operation: Arc<dyn Operation>,
    planning: Arc<dyn PlanningService>,
    state: PlannerState,
}

impl AtomicPlanner {
    pub fn new(
        operation: Arc<dyn Operation>,
        planning: Arc<dyn PlanningService>,
        stopping_conditions: Vec<Fact>,
    ) -> Self {
        Self {
            operation,
            planning,
            state: PlannerState::new(stopping_conditions),
        }
    }

    /// Agent 当前游标；未跟踪或已退出时为 None
    pub fn cursor(&self, paw: &str) -> Option<usize> {
        self.state.cursors.get(paw).copied()
    }

    pub fn is_retired(&self, paw: &str) -> bool {
        self.state.retired.contains(paw)
    }

    pub fn state(&self) -> &PlannerState {
        &self.state
    }

    async fn atomic(&mut self) -> Result<BucketOutcome, PlanningError> {
        let operation = Arc::clone(&self.operation);
        let selector = LinkSelector::new(&operation.adversary().atomic_ordering);

        let mut selected = Vec::new();
        for agent in operation.agents().await {
            if self.state.retired.contains(&agent.paw) {
                continue;
            }
            let candidates = self.planning.get_links(operation.as_ref(), &agent).await?;
            tracing::debug!("Found {} links for agent {}", candidates.len(), agent.paw);

            let cursor = self.state.cursors.get(&agent.paw).copied().unwrap_or(0);
            let selection = selector.select(cursor, &candidates);
            if selection.skipped > 0 {
                tracing::debug!(
                    "Skipped {} unavailable abilities for agent {}",
                    selection.skipped,
                    agent.paw
                );
            }
            match selection.link {
                Some(link) => {
                    tracing::debug!("Next ability for {}: {}", agent.paw, link.ability_id());
                    self.state.cursors.insert(agent.paw.clone(), selection.cursor);
                    selected.push(link);
                }
                None => {
                    tracing::debug!("No more links to run for agent {}", agent.paw);
                    self.state.cursors.remove(&agent.paw);
                    self.state.retired.insert(agent.paw);
                }
            }
        }

        let mut applied: Vec<LinkId> = Vec::with_capacity(selected.len());
        for link in selected {
            let paw = link.paw.clone();
            let id = operation.apply(link).await?;
            tracing::debug!("Applied link {} for agent {}", id, paw);
            applied.push(id);
        }

        self.state.next_bucket = if applied.is_empty() {
            tracing::debug!("No more links to run, ending planner");
            BucketOutcome::Terminated
        } else {
            operation.wait_for_links_completion(&applied).await?;
            tracing::debug!("Completed execution of {} links", applied.len());
            BucketOutcome::Continue(ATOMIC_BUCKET.to_string())
        };
        Ok(self.state.next_bucket.clone())
    }
}

#[async_trait]
impl Planner for AtomicPlanner {
    fn name(&self) -> &str {
        "atomic"
    }

    fn buckets(&self) -> &[&'static str] {
        &[ATOMIC_BUCKET]
    }

    fn next_bucket(&self) -> BucketOutcome {
        self.state.next_bucket.clone()
    }

    fn stopping_conditions(&self) -> &[Fact] {
        &self.state.stopping_conditions
    }

    async fn run_bucket(&mut self, bucket: &str) -> Result<BucketOutcome, PlanningError> {
        match bucket {
            ATOMIC_BUCKET => self.atomic().await,
            other => Err(PlanningError::UnknownBucket(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Ability, Adversary, Agent, Link, LinkStatus};
    use crate::planners::MemoryOperation;

    /// 每个 Agent 固定提供一组 ability
    struct StaticPlanning {
        abilities: HashMap<String, Vec<&'static str>>,
    }

    #[async_trait]
    impl PlanningService for StaticPlanning {
        async fn get_links(&self, _operation: &dyn Operation, agent: &Agent) -> Result<Vec<Link>, PlanningError> {
            Ok(self
                .abilities
                .get(&agent.paw)
                .map(|ids| {
                    ids.iter()
                        .map(|id| Link::new(Ability::new(*id, *id), agent.paw.clone(), format!("run {id}")))
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    fn setup(
        ordering: &[&str],
        abilities: &[(&str, Vec<&'static str>)],
    ) -> (Arc<MemoryOperation>, AtomicPlanner) {
        let agents = abilities
            .iter()
            .map(|(paw, _)| Agent::new(*paw, vec!["sh".into()], "tcp"))
            .collect();
        let (op, mut applied) = MemoryOperation::new("test", Adversary::new("adv", ordering.to_vec()), agents);
        let op = Arc::new(op);

        let executor = Arc::clone(&op);
        tokio::spawn(async move {
            while let Some(link) = applied.recv().await {
                let _ = executor.complete(&link.id, LinkStatus::Success).await;
            }
        });

        let planning = StaticPlanning {
            abilities: abilities
                .iter()
                .map(|(paw, ids)| (paw.to_string(), ids.clone()))
                .collect(),
        };
        let planner = AtomicPlanner::new(op.clone(), Arc::new(planning), vec![]);
        (op, planner)
    }

    #[tokio::test]
    async fn test_unknown_bucket() {
        let (_op, mut planner) = setup(&["A"], &[]);
        assert_eq!(
            planner.run_bucket("recon").await,
            Err(PlanningError::UnknownBucket("recon".into()))
        );
    }

    #[tokio::test]
    async fn test_cursor_advances_and_retires() {
        let (op, mut planner) = setup(&["A", "B", "C"], &[("p1", vec!["A", "C"])]);
        assert_eq!(planner.buckets(), &[ATOMIC_BUCKET]);

        let first = planner.run_bucket(ATOMIC_BUCKET).await.unwrap();
        assert_eq!(first, BucketOutcome::Continue(ATOMIC_BUCKET.into()));
        assert_eq!(planner.cursor("p1"), Some(1));

        planner.run_bucket(ATOMIC_BUCKET).await.unwrap();
        assert_eq!(planner.cursor("p1"), Some(3));

        let last = planner.run_bucket(ATOMIC_BUCKET).await.unwrap();
        assert_eq!(last, BucketOutcome::Terminated);
        assert_eq!(planner.next_bucket(), BucketOutcome::Terminated);
        assert!(planner.is_retired("p1"));
        assert_eq!(planner.cursor("p1"), None);

        let applied: Vec<_> = op
            .tracker()
            .links()
            .await
            .into_iter()
            .map(|l| l.ability.ability_id)
            .collect();
        assert_eq!(applied, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_agents_progress_independently() {
        let (op, mut planner) = setup(
            &["A", "B"],
            &[("p1", vec!["A", "B"]), ("p2", vec!["B"])],
        );
        planner.run_bucket(ATOMIC_BUCKET).await.unwrap();
        assert_eq!(planner.cursor("p1"), Some(1));
        assert_eq!(planner.cursor("p2"), Some(2));

        planner.run_bucket(ATOMIC_BUCKET).await.unwrap();
        assert_eq!(planner.cursor("p1"), Some(2));
        assert!(planner.is_retired("p2"));

        assert_eq!(planner.run_bucket(ATOMIC_BUCKET).await.unwrap(), BucketOutcome::Terminated);
        assert_eq!(op.tracker().links().await.len(), 3);
    }

    #[tokio::test]
    async fn test_late_agent_starts_at_zero() {
        let (op, mut planner) = setup(&["A"], &[("p1", vec!["A"])]);
        planner.run_bucket(ATOMIC_BUCKET).await.unwrap();
        op.add_agent(Agent::new("p-late", vec![], "tcp")).await;
        // p-late 没有候选：直接耗尽；p1 也已耗尽
        assert_eq!(planner.run_bucket(ATOMIC_BUCKET).await.unwrap(), BucketOutcome::Terminated);
        assert!(planner.is_retired("p-late"));
    }
}
