//! Planner 状态机契约与外部驱动循环
//!
//! Planner 由若干命名 bucket 组成；每次执行一个 bucket 得到 BucketOutcome：
//! Continue(下一个 bucket) 或 Terminated。驱动器在 bucket 之间检查取消与停止条件，
//! bucket 出错时将作战关闭为 Aborted(原因) 并把错误交还调用方。
//! 取消只在 bucket 之间生效，正在进行的等待总会完整结束。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::operation::{Operation, OperationState};
use crate::core::PlanningError;
use crate::objects::Fact;

/// bucket 执行结果（即 next_bucket）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketOutcome {
    Continue(String),
    Terminated,
}

/// 规划策略
#[async_trait]
pub trait Planner: Send {
    fn name(&self) -> &str;

    /// 状态机中的全部 bucket
    fn buckets(&self) -> &[&'static str];

    /// 当前 next_bucket（新建时即入口 bucket）
    fn next_bucket(&self) -> BucketOutcome;

    fn stopping_conditions(&self) -> &[Fact];

    async fn run_bucket(&mut self, bucket: &str) -> Result<BucketOutcome, PlanningError>;
}

/// 规划结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 所有 Agent 都没有可执行的 Link
    Exhausted,
    StoppingConditionMet,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanReport {
    pub buckets_run: usize,
    pub reason: StopReason,
}

/// 所有停止条件事实都已出现（空条件永不触发）
pub fn stopping_conditions_met(conditions: &[Fact], facts: &[Fact]) -> bool {
    !conditions.is_empty() && conditions.iter().all(|c| facts.contains(c))
}

/// 驱动 planner 直到终止，并关闭作战
pub async fn execute_planner(
    planner: &mut dyn Planner,
    operation: &dyn Operation,
    cancel: &CancellationToken,
) -> Result<PlanReport, PlanningError> {
    tracing::info!(operation = %operation.id(), "Executing {} planner", planner.name());

    let mut next = planner.next_bucket();
    let mut buckets_run = 0;
    let reason = loop {
        let bucket = match next {
            BucketOutcome::Terminated => break StopReason::Exhausted,
            BucketOutcome::Continue(bucket) => bucket,
        };
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if stopping_conditions_met(planner.stopping_conditions(), &operation.facts().await) {
            tracing::info!(operation = %operation.id(), "Stopping condition met");
            break StopReason::StoppingConditionMet;
        }

        tracing::debug!(operation = %operation.id(), "Entering {} bucket", bucket);
        match planner.run_bucket(&bucket).await {
            Ok(outcome) => {
                buckets_run += 1;
                next = outcome;
            }
            Err(e) => {
                tracing::error!(operation = %operation.id(), "Planner {} failed: {}", planner.name(), e);
                operation.close(OperationState::Aborted(e.to_string())).await;
                return Err(e);
            }
        }
    };

    let state = match reason {
        StopReason::Cancelled => OperationState::Cancelled,
        _ => OperationState::Finished,
    };
    operation.close(state).await;
    tracing::info!(
        operation = %operation.id(),
        "Planner {} stopped after {} buckets: {:?}",
        planner.name(),
        buckets_run,
        reason
    );

    Ok(PlanReport { buckets_run, reason })
}
