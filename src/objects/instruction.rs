//! 指令与指令结果
//!
//! 指令命令与结果输出在协调服务与 BeaconLoop 之间以 base64 传递，发往 Agent 前解码为纯文本。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::core::ContactError;

fn default_timeout() -> u64 {
    60
}

/// 协调服务下发的一条待执行指令（每次心跳生成，BeaconLoop 恰好消费一次）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: String,
    /// base64 编码的命令文本
    pub command: String,
    /// 单次发送超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// 执行后到下一条指令之间的间隔（秒）
    #[serde(default)]
    pub sleep: u64,
}

impl Instruction {
    /// 由明文命令构造（内部完成 base64 编码）
    pub fn new(id: impl Into<String>, command: &str, timeout: u64, sleep: u64) -> Self {
        Self {
            id: id.into(),
            command: STANDARD.encode(command),
            timeout,
            sleep,
        }
    }

    pub fn decode_command(&self) -> Result<String, ContactError> {
        let bytes = STANDARD
            .decode(self.command.trim())
            .map_err(|e| ContactError::Decode(format!("instruction {}: {}", self.id, e)))?;
        String::from_utf8(bytes)
            .map_err(|e| ContactError::Decode(format!("instruction {}: {}", self.id, e)))
    }
}

/// 指令执行结果（output 为 base64 编码的 Agent 输出）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionResult {
    pub id: String,
    pub output: String,
    pub status: i32,
    #[serde(default)]
    pub agent_reported_time: String,
}

impl InstructionResult {
    pub fn new(id: impl Into<String>, output: &str, status: i32, agent_reported_time: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: STANDARD.encode(output),
            status,
            agent_reported_time: agent_reported_time.into(),
        }
    }

    /// 解码输出；非法 base64 或非 UTF-8 时返回 None
    pub fn decoded_output(&self) -> Option<String> {
        STANDARD
            .decode(self.output.as_bytes())
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
    }
}
