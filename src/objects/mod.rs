//! 领域对象：Agent、指令、Link、Adversary、Fact

mod adversary;
mod agent;
mod fact;
mod instruction;
mod link;

pub use adversary::Adversary;
pub use agent::{Agent, AgentProfile, Heartbeat};
pub use fact::Fact;
pub use instruction::{Instruction, InstructionResult};
pub use link::{Ability, Link, LinkId, LinkStatus};
