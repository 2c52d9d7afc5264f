//! Agent 会话 / 接入协议层
//!
//! ## 组件
//!
//! - **SessionRegistry**：存活会话集合（注册、存活探测移除、按 id 查找）
//! - **InstructionChannel**：按会话的请求 / 响应交换，超时有界，失败折叠为确定的失败元组
//! - **TcpContact**：监听 TCP 连接，完成握手并注册会话
//! - **BeaconLoop**：周期刷新注册表、拉取指令、发送并回报结果
//! - **ContactService**：协调服务接口（handle_heartbeat），内存实现为 MemoryContactService
//!
//! ## 会话状态
//!
//! `Established → (Active ⇄ AwaitingResponse) → Closed`
//!
//! 同一会话上的 I/O 串行（同一时刻最多一个请求在途），不同会话之间互不影响。

mod beacon;
mod channel;
mod service;
mod session;
mod tcp;

pub use beacon::BeaconLoop;
pub use channel::{ChannelConfig, CommandResponse, InstructionChannel, FAILURE_PROMPT};
pub use service::{ContactService, MemoryContactService};
pub use session::{Session, SessionId, SessionRegistry, SessionState, Transport};
pub use tcp::{SessionCleanup, TcpContact, CONTACT_NAME};
