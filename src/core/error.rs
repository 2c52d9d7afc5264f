//! 错误类型
//!
//! - ContactError：传输 / 握手 / 协调服务错误，只在通道内部流转，对外统一折叠为失败元组
//! - PlanningError：规划与作战协作方错误，不在 Planner 内恢复，向上传播给驱动器

use std::time::Duration;

use thiserror::Error;

use crate::contact::SessionId;

/// 会话层错误（网络、帧解析、超时、握手、协调服务）
#[derive(Error, Debug)]
pub enum ContactError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Frame exceeds {0} bytes")]
    FrameTooLarge(usize),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Payload decode error: {0}")]
    Decode(String),

    /// 协调服务（handle_heartbeat）返回的错误
    #[error("Coordination error: {0}")]
    Coordination(String),
}

/// 规划引擎错误：候选获取、应用、等待完成均可能失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("Failed to fetch links for agent {paw}: {reason}")]
    LinkFetch { paw: String, reason: String },

    #[error("Failed to apply link {link}: {reason}")]
    Apply { link: String, reason: String },

    #[error("Failed waiting for links: {0}")]
    Wait(String),

    #[error("Unknown link: {0}")]
    UnknownLink(String),

    #[error("Link {0} already reached a terminal status")]
    LinkAlreadyTerminal(String),

    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("Unknown planner: {0}")]
    UnknownPlanner(String),
}
