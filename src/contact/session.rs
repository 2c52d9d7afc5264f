//! 会话与会话注册表
//!
//! Session 同时持有传输的读写两半（BufReader + Writer），所有 I/O 经同一把 tokio Mutex 串行化：
//! 同一会话上的刷新探测与指令收发互斥，不同会话之间互不阻塞。
//! SessionRegistry 以 RwLock<HashMap> 存放存活会话，遍历时先取快照，插入与删除可与遍历并发。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::core::ContactError;
use crate::objects::AgentProfile;

/// 会话 ID：进程内单调递增，永不复用
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// 探测字节（Agent 端忽略空白）
const KEEPALIVE: &[u8] = b" ";

const READ_CHUNK: usize = 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// 握手完成、已注册
    Established = 0,
    /// 空闲可用
    Active = 1,
    /// 已发出指令，等待响应
    AwaitingResponse = 2,
    /// 已移出注册表
    Closed = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Established,
            1 => Self::Active,
            2 => Self::AwaitingResponse,
            _ => Self::Closed,
        }
    }
}

/// 一条连接的读写两半
pub struct Transport {
    reader: BufReader<BoxedReader>,
    writer: BoxedWriter,
    /// 上一个帧之后已读入、尚未消费的字节
    pending: Vec<u8>,
}

impl Transport {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: BufReader::new(Box::new(reader) as BoxedReader),
            writer: Box::new(writer),
            pending: Vec::new(),
        }
    }

    /// 读取握手帧：单行 JSON，长度不超过 max_bytes
    pub async fn read_profile(&mut self, max_bytes: usize) -> Result<AgentProfile, ContactError> {
        let mut line = String::new();
        let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
        let n = (&mut self.reader).take(limit).read_line(&mut line).await?;
        if n == 0 {
            return Err(ContactError::ConnectionClosed);
        }
        if !line.ends_with('\n') && n >= max_bytes {
            return Err(ContactError::FrameTooLarge(max_bytes));
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    /// 丢弃已到达但无人等待的字节（超时请求的迟到响应等），不阻塞；返回丢弃的字节数
    pub async fn discard_stale(&mut self) -> Result<usize, ContactError> {
        let mut discarded = std::mem::take(&mut self.pending).len();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match tokio::time::timeout(Duration::ZERO, self.reader.read(&mut chunk)).await {
                // EOF 留给随后的读写报告
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        Ok(discarded)
    }

    pub async fn write_keepalive(&mut self) -> Result<(), ContactError> {
        self.writer.write_all(KEEPALIVE).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_line(&mut self, line: &str) -> Result<(), ContactError> {
        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 读取一个完整的 JSON 帧；帧之后多读到的字节留在 pending 中。
    /// 累计字节超过 max_bytes 仍未得到完整帧视为错误
    pub async fn read_frame<T: DeserializeOwned>(&mut self, max_bytes: usize) -> Result<T, ContactError> {
        let mut buf = std::mem::take(&mut self.pending);
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let mut frames = serde_json::Deserializer::from_slice(&buf).into_iter::<T>();
            match frames.next() {
                Some(Ok(frame)) => {
                    self.pending = buf[frames.byte_offset()..].to_vec();
                    return Ok(frame);
                }
                Some(Err(e)) if !e.is_eof() => return Err(e.into()),
                // 帧尚未收全（只有空白也算）
                _ => {}
            }
            if buf.len() > max_bytes {
                return Err(ContactError::FrameTooLarge(max_bytes));
            }
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(ContactError::ConnectionClosed);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// 单个 Agent 会话
pub struct Session {
    pub id: SessionId,
    /// Agent 稳定标识（重连后不变）
    pub paw: String,
    transport: Mutex<Transport>,
    state: AtomicU8,
}

impl Session {
    pub fn new(paw: impl Into<String>, transport: Transport) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            paw: paw.into(),
            transport: Mutex::new(transport),
            state: AtomicU8::new(SessionState::Established as u8),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        // Closed 为终态，不再回退
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != SessionState::Closed as u8).then_some(state as u8)
            });
    }

    /// 独占会话 I/O（同一会话上同一时刻最多一个请求在途）
    pub(crate) async fn lock_io(&self) -> MutexGuard<'_, Transport> {
        self.transport.lock().await
    }

    /// 写一个探测字节，失败即认为连接已死
    pub async fn ping(&self) -> Result<(), ContactError> {
        self.lock_io().await.write_keepalive().await
    }

    pub async fn close(&self) {
        self.set_state(SessionState::Closed);
        self.lock_io().await.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("paw", &self.paw)
            .field("state", &self.state())
            .finish()
    }
}

/// 存活会话注册表
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.sessions
            .write()
            .await
            .insert(session.id, Arc::clone(&session));
        session
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// 快照（按 id 升序）
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        let mut all: Vec<_> = self.sessions.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        all
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 移出注册表；仅第一次调用返回 Some
    pub async fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(&id);
        if let Some(session) = &removed {
            session.set_state(SessionState::Closed);
        }
        removed
    }

    /// 存活探测：对每个会话写一个探测字节，写失败的会话立即移除，不重试。
    /// 返回本次移除的会话 id。
    pub async fn refresh(&self) -> Vec<SessionId> {
        let snapshot = self.sessions().await;
        let checks = snapshot.iter().map(|session| async move {
            match session.ping().await {
                Ok(()) => None,
                Err(e) => {
                    tracing::debug!(
                        "Error occurred when refreshing session {}: {}. Removing from session pool.",
                        session.id,
                        e
                    );
                    Some(session.id)
                }
            }
        });
        let dead: Vec<SessionId> = join_all(checks).await.into_iter().flatten().collect();

        let mut removed = Vec::with_capacity(dead.len());
        for id in dead {
            if self.remove(id).await.is_some() {
                removed.push(id);
            }
        }
        removed
    }

    /// 关闭并清空所有会话（关闭时调用）
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close().await;
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn duplex_session(paw: &str) -> (Session, tokio::io::DuplexStream) {
        let (server, peer) = duplex(4096);
        let (r, w) = tokio::io::split(server);
        (Session::new(paw, Transport::new(r, w)), peer)
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let (a, _pa) = duplex_session("a");
        let (b, _pb) = duplex_session("b");
        assert_ne!(a.id, b.id);
        assert_eq!(a.state(), SessionState::Established);
    }

    #[tokio::test]
    async fn test_read_profile() {
        let (server, mut peer) = duplex(4096);
        let (r, w) = tokio::io::split(server);
        let mut transport = Transport::new(r, w);
        peer.write_all(b"{\"executors\":\"sh\",\"paw\":\"p1\"}\n").await.unwrap();
        let profile = transport.read_profile(1024).await.unwrap();
        assert_eq!(profile.paw.as_deref(), Some("p1"));
        assert_eq!(profile.executor_list(), vec!["sh"]);
    }

    #[tokio::test]
    async fn test_read_profile_too_long() {
        let (server, mut peer) = duplex(4096);
        let (r, w) = tokio::io::split(server);
        let mut transport = Transport::new(r, w);
        peer.write_all(b"{\"executors\":\"sh,sh,sh,sh,sh,sh\"}\n").await.unwrap();
        assert!(matches!(
            transport.read_profile(8).await,
            Err(ContactError::FrameTooLarge(8))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_across_chunks() {
        let (server, mut peer) = duplex(4096);
        let (r, w) = tokio::io::split(server);
        let mut transport = Transport::new(r, w);
        tokio::spawn(async move {
            peer.write_all(b"{\"status\":0,").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            peer.write_all(b"\"pwd\":\"/\"}").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });
        let value: serde_json::Value = transport.read_frame(4096).await.unwrap();
        assert_eq!(value["pwd"], "/");
    }

    #[tokio::test]
    async fn test_refresh_removes_dead_session_once() {
        let registry = SessionRegistry::new();
        let (alive, _alive_peer) = duplex_session("alive");
        let (dead, dead_peer) = duplex_session("dead");
        let alive = registry.register(alive).await;
        let dead = registry.register(dead).await;
        drop(dead_peer);

        let removed = registry.refresh().await;
        assert_eq!(removed, vec![dead.id]);
        assert_eq!(dead.state(), SessionState::Closed);
        assert!(registry.get(dead.id).await.is_none());
        assert!(registry.get(alive.id).await.is_some());

        // 第二次刷新不会再次移除
        assert!(registry.refresh().await.is_empty());
        assert!(registry.remove(dead.id).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = SessionRegistry::new();
        let (a, _pa) = duplex_session("same");
        let (b, _pb) = duplex_session("same");
        let (c, _pc) = duplex_session("other");
        registry.register(a).await;
        registry.register(b).await;
        let c = registry.register(c).await;
        assert_eq!(registry.close_all().await, 3);
        assert!(registry.is_empty().await);
        assert_eq!(c.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_read_frame_keeps_trailing_bytes() {
        let (server, mut peer) = duplex(4096);
        let (r, w) = tokio::io::split(server);
        let mut transport = Transport::new(r, w);
        peer.write_all(br#"{"n":1} {"n":2}"#).await.unwrap();

        let first: serde_json::Value = transport.read_frame(4096).await.unwrap();
        assert_eq!(first["n"], 1);
        let second: serde_json::Value = transport.read_frame(4096).await.unwrap();
        assert_eq!(second["n"], 2);
    }

    #[tokio::test]
    async fn test_discard_stale_drops_buffered_and_unread_bytes() {
        let (server, mut peer) = duplex(4096);
        let (r, w) = tokio::io::split(server);
        let mut transport = Transport::new(r, w);
        peer.write_all(br#"{"n":1}{"late":true}"#).await.unwrap();
        let _: serde_json::Value = transport.read_frame(4096).await.unwrap();

        peer.write_all(b"xyz").await.unwrap();
        assert_eq!(transport.discard_stale().await.unwrap(), r#"{"late":true}"#.len() + 3);
        // 没有新数据时立即返回
        assert_eq!(transport.discard_stale().await.unwrap(), 0);

        peer.write_all(br#"{"n":3}"#).await.unwrap();
        let next: serde_json::Value = transport.read_frame(4096).await.unwrap();
        assert_eq!(next["n"], 3);
    }
}
