//! 作战规划执行引擎
//!
//! - **driver**：Planner 状态机契约（命名 bucket、BucketOutcome）与外部驱动循环 execute_planner
//! - **atomic**：参考策略，按 Adversary 攻击链顺序逐 Agent 推进
//! - **selector**：LinkSelector，游标 → 候选 Link 的纯选择算法
//! - **operation**：Operation / PlanningService 协作方接口
//! - **tracker**：LinkTracker 与内存版 MemoryOperation
//! - **executor**：LinkExecutor，把 Link 交给接入层执行并按结果完成

mod atomic;
mod driver;
mod executor;
mod operation;
mod selector;
mod tracker;

use std::sync::Arc;

use crate::core::PlanningError;
use crate::objects::Fact;

pub use atomic::{AtomicPlanner, PlannerState, ATOMIC_BUCKET};
pub use driver::{execute_planner, stopping_conditions_met, BucketOutcome, PlanReport, Planner, StopReason};
pub use executor::LinkExecutor;
pub use operation::{Operation, OperationState, PlanningService};
pub use selector::{LinkSelector, Selection};
pub use tracker::{LinkTracker, MemoryOperation};

/// 可按名字创建的规划策略
pub const PLANNERS: &[&str] = &["atomic"];

/// 按配置中的名字创建规划策略
pub fn build_planner(
    name: &str,
    operation: Arc<dyn Operation>,
    planning: Arc<dyn PlanningService>,
    stopping_conditions: Vec<Fact>,
) -> Result<Box<dyn Planner>, PlanningError> {
    match name {
        "atomic" => Ok(Box::new(AtomicPlanner::new(operation, planning, stopping_conditions))),
        other => Err(PlanningError::UnknownPlanner(other.to_string())),
    }
}
