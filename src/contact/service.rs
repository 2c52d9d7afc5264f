//! 协调服务（handle_heartbeat）
//!
//! ContactService 是会话层唯一依赖的协调接口：握手、拉取指令、回报结果都走 handle_heartbeat。
//! MemoryContactService 为内存实现：按 paw 维护 Agent、待执行指令队列、结果与事实；
//! 通过 enqueue_tracked 排队的指令在结果回报时通知等待方。

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex, RwLock};

use crate::core::ContactError;
use crate::learning::ParserRegistry;
use crate::objects::{Agent, Fact, Heartbeat, Instruction, InstructionResult};

/// 协调服务：返回规范化后的 Agent 与该 Agent 当前应执行的指令
#[async_trait]
pub trait ContactService: Send + Sync {
    async fn handle_heartbeat(&self, beat: Heartbeat) -> Result<(Agent, Vec<Instruction>), ContactError>;
}

/// 内存版协调服务
pub struct MemoryContactService {
    agents: RwLock<HashMap<String, Agent>>,
    pending: RwLock<HashMap<String, VecDeque<Instruction>>>,
    results: RwLock<HashMap<String, Vec<InstructionResult>>>,
    facts: RwLock<HashMap<String, Vec<Fact>>>,
    /// 指令 id -> 结果等待方
    waiters: Mutex<HashMap<String, oneshot::Sender<InstructionResult>>>,
    parsers: ParserRegistry,
}

impl MemoryContactService {
    pub fn new(parsers: ParserRegistry) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            facts: RwLock::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            parsers,
        }
    }

    /// 为 Agent 排队一条指令，返回指令 id
    pub async fn enqueue(&self, paw: &str, command: &str, timeout: u64, sleep: u64) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.push(paw, Instruction::new(id.clone(), command, timeout, sleep)).await;
        id
    }

    /// 排队一条指令；该指令的结果回报时从返回的接收端取得
    pub async fn enqueue_tracked(
        &self,
        paw: &str,
        command: &str,
        timeout: u64,
        sleep: u64,
    ) -> (String, oneshot::Receiver<InstructionResult>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(id.clone(), tx);
        self.push(paw, Instruction::new(id.clone(), command, timeout, sleep)).await;
        (id, rx)
    }

    /// 撤回尚未下发的指令；已被 Agent 取走时返回 false
    pub async fn withdraw(&self, paw: &str, instruction_id: &str) -> bool {
        self.waiters.lock().await.remove(instruction_id);
        let mut pending = self.pending.write().await;
        let Some(queue) = pending.get_mut(paw) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|i| i.id != instruction_id);
        queue.len() != before
    }

    async fn push(&self, paw: &str, instruction: Instruction) {
        self.pending
            .write()
            .await
            .entry(paw.to_string())
            .or_default()
            .push_back(instruction);
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub async fn agent(&self, paw: &str) -> Option<Agent> {
        self.agents.read().await.get(paw).cloned()
    }

    pub async fn results(&self, paw: &str) -> Vec<InstructionResult> {
        self.results.read().await.get(paw).cloned().unwrap_or_default()
    }

    pub async fn facts(&self, paw: &str) -> Vec<Fact> {
        self.facts.read().await.get(paw).cloned().unwrap_or_default()
    }

    pub async fn pending_count(&self, paw: &str) -> usize {
        self.pending.read().await.get(paw).map_or(0, VecDeque::len)
    }

    async fn upsert_agent(&self, beat: &Heartbeat) -> Agent {
        let paw = beat.paw.clone().unwrap_or_else(generate_paw);
        let mut agents = self.agents.write().await;
        let agent = agents.entry(paw.clone()).or_insert_with(|| {
            tracing::info!(paw = %paw, "New agent registered");
            Agent::new(paw.clone(), Vec::new(), beat.contact.clone().unwrap_or_default())
        });
        agent.last_seen = chrono::Utc::now().timestamp_millis();
        if !beat.executors.is_empty() {
            agent.executors = beat.executors.clone();
        }
        if let Some(contact) = &beat.contact {
            agent.contact = contact.clone();
        }
        for (k, v) in &beat.extra {
            agent.extra.insert(k.clone(), v.clone());
        }
        agent.clone()
    }

    async fn store_results(&self, paw: &str, results: Vec<InstructionResult>) {
        let mut extracted = Vec::new();
        for result in &results {
            if let Some(output) = result.decoded_output() {
                extracted.extend(self.parsers.parse_all(&output));
            }
        }
        if !extracted.is_empty() {
            let mut facts = self.facts.write().await;
            let known = facts.entry(paw.to_string()).or_default();
            for fact in extracted {
                if !known.contains(&fact) {
                    known.push(fact);
                }
            }
        }
        {
            let mut waiters = self.waiters.lock().await;
            for result in &results {
                if let Some(tx) = waiters.remove(&result.id) {
                    let _ = tx.send(result.clone());
                }
            }
        }
        self.results
            .write()
            .await
            .entry(paw.to_string())
            .or_default()
            .extend(results);
    }
}

impl Default for MemoryContactService {
    fn default() -> Self {
        Self::new(ParserRegistry::with_defaults())
    }
}

#[async_trait]
impl ContactService for MemoryContactService {
    async fn handle_heartbeat(&self, beat: Heartbeat) -> Result<(Agent, Vec<Instruction>), ContactError> {
        let agent = self.upsert_agent(&beat).await;

        // 回报结果的心跳不领取新指令，避免指令被取走后无人执行
        if !beat.results.is_empty() {
            self.store_results(&agent.paw, beat.results).await;
            return Ok((agent, Vec::new()));
        }

        let instructions: Vec<Instruction> = self
            .pending
            .write()
            .await
            .get_mut(&agent.paw)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default();
        Ok((agent, instructions))
    }
}

fn generate_paw() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
