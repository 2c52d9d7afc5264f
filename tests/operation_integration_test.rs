//! 作战端到端测试：规划器应用的 Link 经 LinkExecutor 排队，由 BeaconLoop 通过真实 TCP 会话下发，
//! Agent 的回报决定 Link 终态

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use emu::config::{AppConfig, TcpSection};
    use emu::contact::{MemoryContactService, TcpContact};
    use emu::core::PlanningError;
    use emu::objects::{Ability, Adversary, Agent, Fact, Link, LinkStatus};
    use emu::planners::{
        build_planner, execute_planner, LinkExecutor, MemoryOperation, Operation, OperationState,
        PlanningService, StopReason,
    };
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio_util::sync::CancellationToken;

    /// A -> whoami（成功），B -> exfil（Agent 返回非零状态）
    struct CommandPlanning;

    #[async_trait]
    impl PlanningService for CommandPlanning {
        async fn get_links(&self, _operation: &dyn Operation, agent: &Agent) -> Result<Vec<Link>, PlanningError> {
            Ok(vec![
                Link::new(Ability::new("A", "Find user"), agent.paw.clone(), "whoami"),
                Link::new(Ability::new("B", "Exfiltrate"), agent.paw.clone(), "exfil"),
            ])
        }
    }

    async fn spawn_agent(addr: std::net::SocketAddr, paw: &str) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let profile = serde_json::json!({"paw": paw, "executors": "sh"});
        stream.write_all(format!("{}\n", profile).as_bytes()).await.unwrap();
        tokio::spawn(async move {
            let (r, mut w) = stream.into_split();
            let mut lines = BufReader::new(r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = match line.trim() {
                    "" => continue,
                    "whoami" => serde_json::json!({"status": 0, "pwd": "/root", "response": "root on 10.20.30.40"}),
                    other => serde_json::json!({"status": 1, "pwd": "/root", "response": format!("{}: not found", other)}),
                };
                if w.write_all(reply.to_string().as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }

    #[tokio::test]
    async fn test_link_results_flow_back_from_agent() {
        let cfg = AppConfig::default();
        let service = Arc::new(MemoryContactService::default());
        let shutdown = CancellationToken::new();
        let contact = Arc::new(TcpContact::new(
            TcpSection {
                bind: "127.0.0.1:0".into(),
                beacon_interval_secs: 1,
                refresh_interval_secs: 3600,
                handshake_timeout_secs: 2,
                ..TcpSection::default()
            },
            service.clone(),
            shutdown.clone(),
        ));
        let addr = contact.start().await.unwrap();
        spawn_agent(addr, "op-paw").await;

        let (op, applied) = MemoryOperation::new(
            "e2e",
            Adversary::new("adv", ["A", "B"]),
            vec![Agent::new("op-paw", vec!["sh".into()], "tcp")],
        );
        let op = Arc::new(op);
        let executor = Arc::new(LinkExecutor::new(op.clone(), service.clone(), &cfg.planner));
        tokio::spawn(executor.run(applied, shutdown.clone()));

        let mut planner = build_planner(&cfg.planner.name, op.clone(), Arc::new(CommandPlanning), vec![]).unwrap();
        let report = tokio::time::timeout(
            Duration::from_secs(20),
            execute_planner(&mut *planner, &*op, &CancellationToken::new()),
        )
        .await
        .expect("operation should finish")
        .unwrap();

        assert_eq!(report.reason, StopReason::Exhausted);
        let outcomes: Vec<_> = op
            .tracker()
            .links()
            .await
            .into_iter()
            .map(|l| (l.ability.ability_id, l.status))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ("A".to_string(), LinkStatus::Success),
                ("B".to_string(), LinkStatus::Failed),
            ]
        );
        assert!(op.facts().await.contains(&Fact::new("host.ip.address", "10.20.30.40")));
        assert_eq!(op.state().await, OperationState::Finished);
        shutdown.cancel();
    }
}
