//! 指令通道：按会话的请求 / 响应交换
//!
//! send(session_id, command, timeout) 的步骤：写探测字节 → 等待短暂的 settle 间隔 → 写 `command\n`
//! → 在 timeout 内读取一个 JSON 响应帧。任何失败（会话不存在、JSON 非法、Socket 错误、超时）
//! 都折叠为确定的失败元组 `(1, "~$ ", 错误文本, "")`，调用方无需处理传输异常。
//! 写探测字节前先丢弃会话上已到达的残留字节，超时请求的迟到响应不会串到下一次 send。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::session::{SessionId, SessionRegistry, SessionState};
use crate::core::ContactError;

/// 失败时回给调用方的提示符
pub const FAILURE_PROMPT: &str = "~$ ";

/// Agent 响应帧
#[derive(Debug, Deserialize)]
struct ResponseFrame {
    status: i32,
    pwd: String,
    response: String,
    #[serde(default)]
    agent_reported_time: Option<String>,
}

/// send 的结果：(status, pwd, response, agent_reported_time)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub status: i32,
    pub pwd: String,
    pub response: String,
    pub agent_reported_time: String,
}

impl CommandResponse {
    pub fn failure(error: &ContactError) -> Self {
        Self {
            status: 1,
            pwd: FAILURE_PROMPT.to_string(),
            response: error.to_string(),
            agent_reported_time: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }

    pub fn into_tuple(self) -> (i32, String, String, String) {
        (self.status, self.pwd, self.response, self.agent_reported_time)
    }
}

impl From<ResponseFrame> for CommandResponse {
    fn from(frame: ResponseFrame) -> Self {
        Self {
            status: frame.status,
            pwd: frame.pwd,
            response: frame.response,
            agent_reported_time: frame.agent_reported_time.unwrap_or_default(),
        }
    }
}

/// 通道参数
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// 探测字节与命令之间的等待
    pub settle_delay: Duration,
    /// 单个响应帧的最大字节数
    pub max_response_bytes: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(10),
            max_response_bytes: 4096,
        }
    }
}

/// 指令通道：在注册表之上按会话收发
pub struct InstructionChannel {
    registry: Arc<SessionRegistry>,
    config: ChannelConfig,
}

impl InstructionChannel {
    pub fn new(registry: Arc<SessionRegistry>, config: ChannelConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 发送命令并等待响应；永不返回错误
    pub async fn send(&self, session_id: SessionId, command: &str, timeout: Duration) -> CommandResponse {
        match self.try_send(session_id, command, timeout).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(session = session_id, "Send failed: {}", e);
                CommandResponse::failure(&e)
            }
        }
    }

    async fn try_send(
        &self,
        session_id: SessionId,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandResponse, ContactError> {
        let session = self
            .registry
            .get(session_id)
            .await
            .ok_or(ContactError::SessionNotFound(session_id))?;

        // 等锁的时间不计入本次超时
        let mut io = session.lock_io().await;
        session.set_state(SessionState::AwaitingResponse);

        let exchange = async {
            // 之前超时请求的迟到响应不能被当作本次响应
            let stale = io.discard_stale().await?;
            if stale > 0 {
                tracing::debug!(session = session_id, "Discarded {} stale bytes before send", stale);
            }
            io.write_keepalive().await?;
            tokio::time::sleep(self.config.settle_delay).await;
            io.write_line(command).await?;
            io.read_frame::<ResponseFrame>(self.config.max_response_bytes).await
        };
        let result = tokio::time::timeout(timeout, exchange).await;
        drop(io);
        session.set_state(SessionState::Active);

        match result {
            Ok(frame) => Ok(frame?.into()),
            Err(_) => {
                tracing::error!("Timeout reached for session {}", session_id);
                Err(ContactError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::session::{Session, Transport};
    use tokio::io::{duplex, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

    async fn channel_with_peer() -> (InstructionChannel, SessionId, tokio::io::DuplexStream) {
        let registry = Arc::new(SessionRegistry::new());
        let (server, peer) = duplex(8192);
        let (r, w) = tokio::io::split(server);
        let session = registry.register(Session::new("paw-1", Transport::new(r, w))).await;
        (
            InstructionChannel::new(registry, ChannelConfig::default()),
            session.id,
            peer,
        )
    }

    #[tokio::test]
    async fn test_send_unknown_session_returns_failure_tuple() {
        let channel = InstructionChannel::new(Arc::new(SessionRegistry::new()), ChannelConfig::default());
        let (status, pwd, response, time) = channel
            .send(999_999, "whoami", Duration::from_secs(1))
            .await
            .into_tuple();
        assert_eq!(status, 1);
        assert_eq!(pwd, "~$ ");
        assert_eq!(response, "Session 999999 not found");
        assert_eq!(time, "");
    }

    #[tokio::test]
    async fn test_send_roundtrip() {
        let (channel, id, peer) = channel_with_peer().await;
        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(peer);
            let mut lines = BufReader::new(r).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            assert_eq!(line.trim(), "hostname");
            w.write_all(br#"{"status":0,"pwd":"/root","response":"web01","agent_reported_time":"2024-01-01T00:00:00Z"}"#)
                .await
                .unwrap();
        });
        let response = channel.send(id, "hostname", Duration::from_secs(2)).await;
        assert_eq!(response.status, 0);
        assert_eq!(response.pwd, "/root");
        assert_eq!(response.response, "web01");
        assert_eq!(response.agent_reported_time, "2024-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_send_malformed_json() {
        let (channel, id, peer) = channel_with_peer().await;
        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(peer);
            let mut lines = BufReader::new(r).lines();
            let _ = lines.next_line().await;
            w.write_all(b"not json at all").await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });
        let response = channel.send(id, "id", Duration::from_secs(2)).await;
        assert_eq!(response.status, 1);
        assert_eq!(response.pwd, FAILURE_PROMPT);
        assert!(response.response.starts_with("Malformed frame"));
    }

    #[tokio::test]
    async fn test_timeout_keeps_session_registered() {
        let (channel, id, _peer) = channel_with_peer().await;
        let response = channel.send(id, "sleep 60", Duration::from_millis(100)).await;
        assert_eq!(response.status, 1);
        assert!(response.response.starts_with("Timeout"));
        let session = channel.registry().get(id).await.expect("still registered");
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_sends_on_one_session_are_serialized() {
        let (channel, id, peer) = channel_with_peer().await;
        let channel = Arc::new(channel);

        let agent = tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(peer);
            let mut lines = BufReader::new(r).lines();
            for i in 0..2 {
                let line = lines.next_line().await.unwrap().unwrap();
                assert!(line.trim().starts_with("cmd"));
                // 响应之前不应收到下一条命令
                let early = tokio::time::timeout(Duration::from_millis(100), lines.next_line()).await;
                assert!(early.is_err(), "second command arrived while first was in flight");
                let reply = format!(r#"{{"status":0,"pwd":"/","response":"{}"}}"#, i);
                w.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let a = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send(id, "cmd-a", Duration::from_secs(5)).await })
        };
        let b = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send(id, "cmd-b", Duration::from_secs(5)).await })
        };
        let mut responses = vec![a.await.unwrap().response, b.await.unwrap().response];
        responses.sort();
        assert_eq!(responses, vec!["0", "1"]);
        agent.await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_is_not_returned_to_next_send() {
        let (channel, id, peer) = channel_with_peer().await;
        let (late_tx, late_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(peer);
            let mut lines = BufReader::new(r).lines();
            let slow = lines.next_line().await.unwrap().unwrap();
            tokio::time::sleep(Duration::from_millis(300)).await;
            let reply = format!(r#"{{"status":0,"pwd":"/","response":"{}"}}"#, slow.trim());
            w.write_all(reply.as_bytes()).await.unwrap();
            let _ = late_tx.send(());

            let next = lines.next_line().await.unwrap().unwrap();
            let reply = format!(r#"{{"status":0,"pwd":"/","response":"{}"}}"#, next.trim());
            w.write_all(reply.as_bytes()).await.unwrap();
        });

        let timed_out = channel.send(id, "slow", Duration::from_millis(100)).await;
        assert_eq!(timed_out.status, 1);
        late_rx.await.unwrap();

        let response = channel.send(id, "hostname", Duration::from_secs(2)).await;
        assert_eq!(response.status, 0);
        assert_eq!(response.response, "hostname");
    }

    #[tokio::test]
    async fn test_refresh_waits_for_in_flight_send() {
        let (channel, id, peer) = channel_with_peer().await;
        let channel = Arc::new(channel);
        let (received_tx, received_rx) = tokio::sync::oneshot::channel();

        let agent = tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(peer);
            let mut reader = BufReader::new(r);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            assert_eq!(line.trim(), "uname");
            let _ = received_tx.send(());

            // 响应写出之前不应收到刷新的探测字节
            let mut byte = [0u8; 1];
            let early = tokio::time::timeout(Duration::from_millis(150), reader.read(&mut byte)).await;
            assert!(early.is_err(), "keepalive byte arrived while a send was in flight");

            w.write_all(br#"{"status":0,"pwd":"/","response":"Linux"}"#).await.unwrap();
            reader.read_exact(&mut byte).await.unwrap();
            byte[0]
        });

        let send = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.send(id, "uname", Duration::from_secs(5)).await })
        };
        received_rx.await.unwrap();
        let removed = channel.registry().refresh().await;

        assert!(removed.is_empty());
        assert_eq!(send.await.unwrap().response, "Linux");
        assert_eq!(agent.await.unwrap(), b' ');
    }
}
