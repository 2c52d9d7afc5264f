//! Fact：从 Agent 输出中提取的 (trait, value) 数据

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub value: String,
}

impl Fact {
    pub fn new(trait_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            trait_name: trait_name.into(),
            value: value.into(),
        }
    }
}
