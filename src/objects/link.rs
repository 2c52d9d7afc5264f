//! Ability 与 Link

use serde::{Deserialize, Serialize};

/// Link ID（UUID v4 字符串）
pub type LinkId = String;

/// 技术定义的引用（只保留规划所需字段）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    pub ability_id: String,
    pub name: String,
}

impl Ability {
    pub fn new(ability_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ability_id: ability_id.into(),
            name: name.into(),
        }
    }
}

/// Link 状态；Success / Failed / Discarded 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Pending,
    Running,
    Success,
    Failed,
    Discarded,
}

impl LinkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Discarded)
    }
}

/// 某个 Ability 在某个 Agent 上的一次具体应用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub ability: Ability,
    /// 目标 Agent 的 paw
    pub paw: String,
    pub command: String,
    pub status: LinkStatus,
}

impl Link {
    pub fn new(ability: Ability, paw: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ability,
            paw: paw.into(),
            command: command.into(),
            status: LinkStatus::Pending,
        }
    }

    pub fn ability_id(&self) -> &str {
        &self.ability.ability_id
    }
}
