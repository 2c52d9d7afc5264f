//! Adversary：攻击链（有序的 ability id 列表）

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adversary {
    pub adversary_id: String,
    pub name: String,
    /// 攻击链顺序，允许重复 id
    #[serde(default)]
    pub atomic_ordering: Vec<String>,
}

impl Adversary {
    pub fn new<I, S>(name: impl Into<String>, ordering: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            adversary_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            atomic_ordering: ordering.into_iter().map(Into::into).collect(),
        }
    }
}
