//! Agent、握手 Profile 与心跳记录

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::InstructionResult;

/// 远端 Agent（以稳定的 paw 标识，跨重连保持不变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub paw: String,
    /// 可用执行器（psh、cmd、sh ...）
    pub executors: Vec<String>,
    /// 接入通道名（tcp 等）
    pub contact: String,
    /// 最后一次心跳时间（毫秒时间戳）
    pub last_seen: i64,
    /// Profile 中其余字段，原样保留
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Agent {
    pub fn new(paw: impl Into<String>, executors: Vec<String>, contact: impl Into<String>) -> Self {
        Self {
            paw: paw.into(),
            executors,
            contact: contact.into(),
            last_seen: chrono::Utc::now().timestamp_millis(),
            extra: Map::new(),
        }
    }
}

/// 握手帧：Agent 连接后发送的第一行 JSON
#[derive(Debug, Clone, Deserialize)]
pub struct AgentProfile {
    #[serde(default)]
    pub paw: Option<String>,
    /// 逗号分隔的执行器列表，如 "psh,cmd"
    pub executors: String,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentProfile {
    /// 拆分 executors，丢弃空项
    pub fn executor_list(&self) -> Vec<String> {
        self.executors
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(String::from)
            .collect()
    }
}

/// 交给协调服务的心跳：首次握手、定期拉取指令、回报结果共用同一结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    pub paw: Option<String>,
    #[serde(default)]
    pub executors: Vec<String>,
    pub contact: Option<String>,
    #[serde(default)]
    pub results: Vec<InstructionResult>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Heartbeat {
    /// 由握手 Profile 构造，附加通道标识（覆盖 Agent 自报的 contact）
    pub fn from_profile(profile: AgentProfile, contact: &str) -> Self {
        let executors = profile.executor_list();
        Self {
            paw: profile.paw,
            executors,
            contact: Some(contact.to_string()),
            results: Vec::new(),
            extra: profile.extra,
        }
    }

    /// 仅携带 paw：拉取待执行指令
    pub fn poll(paw: impl Into<String>) -> Self {
        Self {
            paw: Some(paw.into()),
            ..Self::default()
        }
    }

    /// 回报单条指令结果
    pub fn report(paw: impl Into<String>, result: InstructionResult) -> Self {
        Self {
            paw: Some(paw.into()),
            results: vec![result],
            ..Self::default()
        }
    }
}
