//! 编排循环集成测试：Scripted 网关 + Scripted 确认门 + 临时工作区

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use amas::config::AppConfig;
    use amas::core::{
        AgentEvent, GatewayError, LoopState, Orchestrator, OrchestratorBuilder, ResultStatus,
        SessionSupervisor, TurnOutcome,
    };
    use amas::llm::{
        DeltaStream, GatewayEvent, ModelGateway, ModelRequest, ScriptedGateway, ScriptedReply,
    };
    use amas::memory::{Role, SUMMARY_PREFIX};
    use amas::snapshot::FsSnapshotStore;
    use amas::tools::{ConfirmationGate, Decision, IgnoreRules, PendingConfirmation, ScriptedGate};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".into();
        cfg.llm.retry_delay_ms = 1;
        cfg
    }

    async fn setup(
        workspace: &Path,
        cfg: AppConfig,
        gateway: Arc<ScriptedGateway>,
        gate: Arc<dyn ConfirmationGate>,
    ) -> (Orchestrator, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = OrchestratorBuilder::new(cfg, workspace)
            .with_gateway(gateway as Arc<dyn ModelGateway>)
            .with_gate(gate)
            .with_events(tx)
            .build()
            .await;
        (orchestrator, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn snapshot_count(orchestrator: &Orchestrator) -> usize {
        orchestrator.undo_history().list(100).await.unwrap().len()
    }

    fn tool_turn_contents(orchestrator: &Orchestrator) -> Vec<(String, String)> {
        orchestrator
            .conversation()
            .turns()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .map(|t| (t.tool_call_id.clone().unwrap_or_default(), t.content.clone()))
            .collect()
    }

    fn write_hello() -> ScriptedReply {
        ScriptedReply::tool_calls(vec![(
            "call_1",
            "write_file",
            json!({"path": "hello.py", "content": "print('hello world')\n"}),
        )])
    }

    #[tokio::test]
    async fn test_accepted_write_creates_file_and_one_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            write_hello(),
            ScriptedReply::text("Created hello.py"),
        ]));
        let gate = Arc::new(ScriptedGate::accept_all(1));
        let (mut orch, mut rx) = setup(dir.path(), test_config(), gateway.clone(), gate.clone()).await;
        let before = snapshot_count(&orch).await;

        let outcome = orch.handle_input("create hello.py printing hello world").await;
        assert_eq!(outcome, TurnOutcome::Reply("Created hello.py".into()));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.py")).unwrap(),
            "print('hello world')\n"
        );
        assert_eq!(snapshot_count(&orch).await, before + 1);
        assert_eq!(gate.seen().len(), 1);
        assert_eq!(orch.state(), LoopState::Idle);

        // 第二次请求带上了工具结果
        let requests = gateway.requests();
        let last = requests[1].last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert!(last.content.starts_with("Wrote"));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::Preview { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolResult { status: ResultStatus::Success, .. }
        )));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::SnapshotSaved { .. })));
    }

    #[tokio::test]
    async fn test_auto_accept_skips_gate_but_emits_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.agent.auto_accept = true;
        let gateway = Arc::new(ScriptedGateway::with_replies([
            write_hello(),
            ScriptedReply::text("Done"),
        ]));
        let gate = Arc::new(ScriptedGate::default());
        let (mut orch, mut rx) = setup(dir.path(), cfg, gateway, gate.clone()).await;

        orch.handle_input("create hello.py").await;
        assert!(dir.path().join("hello.py").exists());
        assert!(gate.seen().is_empty());
        let events = drain(&mut rx);
        assert!(events.iter().any(
            |e| matches!(e, AgentEvent::Preview { tool, .. } if tool == "write_file")
        ));
    }

    /// submit 时先把已发出的 ToolResult 记下来，用于检查结果与请求的先后
    struct RecordingGateway {
        inner: ScriptedGateway,
        events: Mutex<mpsc::UnboundedReceiver<AgentEvent>>,
        log: Mutex<Vec<String>>,
    }

    impl RecordingGateway {
        fn collect(&self) {
            let mut rx = self.events.lock().unwrap();
            let mut log = self.log.lock().unwrap();
            while let Ok(ev) = rx.try_recv() {
                if let AgentEvent::ToolResult { id, .. } = ev {
                    log.push(format!("result {id}"));
                }
            }
        }

        fn entries(&self) -> Vec<String> {
            self.collect();
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelGateway for RecordingGateway {
        fn name(&self) -> &str {
            "recording"
        }

        async fn submit(&self, request: ModelRequest<'_>) -> Result<DeltaStream, GatewayError> {
            self.collect();
            let n = self.inner.request_count() + 1;
            self.log.lock().unwrap().push(format!("submit {n}"));
            self.inner.submit(request).await
        }

        async fn summarize(&self, prompt: &str) -> Result<String, GatewayError> {
            self.inner.summarize(prompt).await
        }
    }

    #[tokio::test]
    async fn test_tool_results_surface_after_follow_up_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(RecordingGateway {
            inner: ScriptedGateway::with_replies([
                ScriptedReply::tool_calls(vec![
                    ("r1", "read_file", json!({"path": "a.txt"})),
                    ("r2", "list_files", json!({})),
                ]),
                ScriptedReply::text("It says alpha."),
            ]),
            events: Mutex::new(rx),
            log: Mutex::new(Vec::new()),
        });
        let mut orch = OrchestratorBuilder::new(test_config(), dir.path())
            .with_gateway(gateway.clone() as Arc<dyn ModelGateway>)
            .with_gate(Arc::new(ScriptedGate::default()))
            .with_events(tx)
            .build()
            .await;

        assert_eq!(
            orch.handle_input("what is in a.txt?").await,
            TurnOutcome::Reply("It says alpha.".into())
        );
        assert_eq!(
            gateway.entries(),
            vec!["submit 1", "submit 2", "result r1", "result r2"]
        );
    }

    #[tokio::test]
    async fn test_tools_cannot_touch_snapshot_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.agent.auto_accept = true;
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::tool_calls(vec![
                (
                    "c1",
                    "write_file",
                    json!({"path": ".amas/snapshots/records.jsonl", "content": "garbage\n"}),
                ),
                ("c2", "delete_file", json!({"path": ".amas/snapshots/HEAD"})),
            ]),
            ScriptedReply::text("Tried."),
        ]));
        let (mut orch, _rx) =
            setup(dir.path(), cfg, gateway, Arc::new(ScriptedGate::default())).await;
        let before = snapshot_count(&orch).await;

        orch.handle_input("wipe the undo history").await;
        let results = tool_turn_contents(&orch);
        assert_eq!(results.len(), 2);
        for (_, content) in &results {
            assert!(
                content.starts_with("Error: path is inside the protected .amas/ directory"),
                "{content}"
            );
        }
        assert_eq!(snapshot_count(&orch).await, before);
        assert!(FsSnapshotStore::open(dir.path(), IgnoreRules::new(&[])).await.is_ok());
    }

    #[tokio::test]
    async fn test_declined_write_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            write_hello(),
            ScriptedReply::text("Okay, I won't."),
        ]));
        let gate = Arc::new(ScriptedGate::new([Decision::Declined]));
        let (mut orch, _rx) = setup(dir.path(), test_config(), gateway, gate).await;
        let before = snapshot_count(&orch).await;

        let outcome = orch.handle_input("create hello.py printing hello world").await;
        assert_eq!(outcome, TurnOutcome::Reply("Okay, I won't.".into()));
        assert!(!dir.path().join("hello.py").exists());
        assert_eq!(snapshot_count(&orch).await, before);
        let results = tool_turn_contents(&orch);
        assert_eq!(results.len(), 1);
        assert!(results[0].1.contains("declined by user"));
    }

    #[tokio::test]
    async fn test_results_follow_call_order_without_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta").unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::tool_calls(vec![
                ("c1", "read_file", json!({"path": "b.txt"})),
                ("c2", "list_files", json!({})),
                ("c3", "read_file", json!({"path": "a.txt"})),
                ("c4", "no_such_tool", json!({})),
            ]),
            ScriptedReply::text("done"),
        ]));
        let (mut orch, _rx) =
            setup(dir.path(), test_config(), gateway, Arc::new(ScriptedGate::default())).await;
        let before = snapshot_count(&orch).await;

        assert_eq!(orch.handle_input("look around").await, TurnOutcome::Reply("done".into()));
        let results = tool_turn_contents(&orch);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
        assert!(results[0].1.contains("beta"));
        assert!(results[2].1.contains("alpha"));
        assert_eq!(results[3].1, "Error: unknown tool 'no_such_tool'");
        assert_eq!(snapshot_count(&orch).await, before);
    }

    #[tokio::test]
    async fn test_long_tool_loop_warns_but_continues() {
        let dir = tempfile::tempdir().unwrap();
        let mut replies: Vec<ScriptedReply> = (0..25)
            .map(|i| {
                let id = format!("call_{i}");
                ScriptedReply::tool_calls(vec![(id.as_str(), "list_files", json!({}))])
            })
            .collect();
        replies.push(ScriptedReply::text("finally"));
        let gateway = Arc::new(ScriptedGateway::with_replies(replies));
        let (mut orch, mut rx) =
            setup(dir.path(), test_config(), gateway, Arc::new(ScriptedGate::default())).await;

        assert_eq!(orch.handle_input("loop").await, TurnOutcome::Reply("finally".into()));
        let warnings: Vec<&str> = orch
            .conversation()
            .turns()
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("20 tool iterations"));
        assert_eq!(tool_turn_contents(&orch).len(), 25);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Warning { text } if text.contains("20 tool iterations"))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_timeout_does_not_hang() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.tools.shell_timeout_secs = 1;
        cfg.agent.auto_accept = true;
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::tool_calls(vec![("s1", "shell_command", json!({"command": "sleep 10"}))]),
            ScriptedReply::text("timed out"),
        ]));
        let (mut orch, _rx) = setup(dir.path(), cfg, gateway, Arc::new(ScriptedGate::default())).await;

        let outcome = tokio::time::timeout(Duration::from_secs(8), orch.handle_input("run it"))
            .await
            .expect("loop must not hang");
        assert_eq!(outcome, TurnOutcome::Reply("timed out".into()));
        assert_eq!(
            tool_turn_contents(&orch)[0].1,
            "Error: command timed out after 1s"
        );
    }

    #[tokio::test]
    async fn test_interrupt_while_awaiting_model() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new().with_delay(Duration::from_secs(30)));
        let (mut orch, mut rx) =
            setup(dir.path(), test_config(), gateway, Arc::new(ScriptedGate::default())).await;

        let supervisor = orch.supervisor();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            supervisor.cancel();
        });
        let outcome = tokio::time::timeout(Duration::from_secs(5), orch.handle_input("hello"))
            .await
            .unwrap();
        assert_eq!(outcome, TurnOutcome::Interrupted);
        assert_eq!(orch.conversation().len(), 1);
        assert_eq!(orch.conversation().turns()[0].role, Role::User);
        assert_eq!(orch.state(), LoopState::Idle);
        assert!(drain(&mut rx).iter().any(|e| matches!(e, AgentEvent::Interrupted)));
    }

    /// 确认时触发中断，模拟执行工具期间按下 Ctrl+C
    #[derive(Default)]
    struct InterruptingGate {
        supervisor: Mutex<Option<SessionSupervisor>>,
    }

    #[async_trait]
    impl ConfirmationGate for InterruptingGate {
        async fn confirm(&self, _pending: &PendingConfirmation) -> Decision {
            if let Some(sup) = self.supervisor.lock().unwrap().as_ref() {
                sup.cancel();
            }
            Decision::Accepted
        }
    }

    #[tokio::test]
    async fn test_interrupt_while_executing_tools_skips_rest() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([ScriptedReply::tool_calls(vec![
            ("w1", "write_file", json!({"path": "out.txt", "content": "x"})),
            ("r1", "read_file", json!({"path": "out.txt"})),
            ("r2", "list_files", json!({})),
        ])]));
        let gate = Arc::new(InterruptingGate::default());
        let (mut orch, _rx) = setup(dir.path(), test_config(), gateway.clone(), gate.clone()).await;
        *gate.supervisor.lock().unwrap() = Some(orch.supervisor());

        assert_eq!(orch.handle_input("write then read").await, TurnOutcome::Interrupted);
        assert!(dir.path().join("out.txt").exists());
        let results = tool_turn_contents(&orch);
        assert_eq!(results.len(), 3);
        assert!(results[0].1.starts_with("Wrote"));
        assert!(results[1].1.contains("interrupted"));
        assert!(results[2].1.contains("interrupted"));
        assert_eq!(gateway.request_count(), 1);
        assert!(orch.conversation().pending_call_ids().is_empty());
    }

    #[tokio::test]
    async fn test_transient_gateway_error_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::FailMidStream(
                vec![GatewayEvent::TextDelta("partial".into())],
                GatewayError::Stream("connection reset by peer".into()),
            ),
            ScriptedReply::text("recovered"),
        ]));
        let (mut orch, mut rx) =
            setup(dir.path(), test_config(), gateway.clone(), Arc::new(ScriptedGate::default())).await;

        assert_eq!(orch.handle_input("hi").await, TurnOutcome::Reply("recovered".into()));
        assert_eq!(gateway.request_count(), 2);
        let turns = orch.conversation().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "recovered");

        // 失败那次的 "partial" 之后必须先有 StreamReset，再出现重试的文本
        let texts: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|ev| match ev {
                AgentEvent::TextDelta { text } => Some(text),
                AgentEvent::StreamReset => Some("<reset>".to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["partial", "<reset>", "recovered"]);
    }

    #[tokio::test]
    async fn test_persistent_gateway_error_aborts_turn() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::fail(GatewayError::Http { status: 503, body: String::new() }),
            ScriptedReply::fail(GatewayError::Http { status: 503, body: String::new() }),
            ScriptedReply::fail(GatewayError::Http { status: 401, body: "bad key".into() }),
        ]));
        let (mut orch, _rx) =
            setup(dir.path(), test_config(), gateway.clone(), Arc::new(ScriptedGate::default())).await;

        assert!(matches!(orch.handle_input("hi").await, TurnOutcome::Aborted(_)));
        assert_eq!(gateway.request_count(), 2);
        assert_eq!(orch.conversation().len(), 1);
        assert_eq!(orch.state(), LoopState::Idle);

        // 401 不重试
        assert!(matches!(orch.handle_input("again").await, TurnOutcome::Aborted(_)));
        assert_eq!(gateway.request_count(), 3);
    }

    #[tokio::test]
    async fn test_compaction_failure_keeps_history_then_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config();
        cfg.agent.compaction_threshold_tokens = 10;
        cfg.agent.compaction_keep_recent = 2;
        let gateway = Arc::new(
            ScriptedGateway::new().with_summaries([Err(GatewayError::Network("down".into()))]),
        );
        let (mut orch, mut rx) =
            setup(dir.path(), cfg, gateway, Arc::new(ScriptedGate::default())).await;

        orch.handle_input("first question about the parser").await;
        orch.handle_input("second question about the lexer").await;
        drain(&mut rx);
        orch.handle_input("third question").await;
        assert_eq!(orch.conversation().len(), 6);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Warning { text } if text.contains("Compaction failed"))));

        orch.handle_input("fourth question").await;
        let first = &orch.conversation().turns()[0];
        assert_eq!(first.role, Role::System);
        assert!(first.content.starts_with(SUMMARY_PREFIX));
        assert_eq!(orch.conversation().len(), 5);
    }

    #[tokio::test]
    async fn test_commands_short_circuit_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        let (mut orch, _rx) =
            setup(dir.path(), test_config(), gateway.clone(), Arc::new(ScriptedGate::default())).await;

        assert!(matches!(orch.handle_input("/help").await, TurnOutcome::CommandOutput(t) if t.contains("/undo")));
        assert!(matches!(orch.handle_input("/yo").await, TurnOutcome::CommandOutput(t) if t.contains("ON")));
        assert!(orch.session().auto_accept());
        assert!(matches!(orch.handle_input("/bogus").await, TurnOutcome::CommandOutput(t) if t.contains("Unknown command")));
        assert!(matches!(orch.handle_input("/cost").await, TurnOutcome::CommandOutput(t) if t.contains("Messages: 0")));
        assert_eq!(gateway.request_count(), 0);
        assert!(orch.conversation().is_empty());

        assert_eq!(orch.handle_input("/quit").await, TurnOutcome::Exit);
        assert_eq!(orch.state(), LoopState::Terminated);
        assert_eq!(orch.handle_input("hello?").await, TurnOutcome::Exit);
    }

    #[tokio::test]
    async fn test_model_command_shows_and_switches() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([ScriptedReply::text("ok")]));
        let (mut orch, _rx) =
            setup(dir.path(), test_config(), gateway.clone(), Arc::new(ScriptedGate::default())).await;
        let current = orch.session().config().llm.model.clone();

        assert!(matches!(orch.handle_input("/model").await, TurnOutcome::CommandOutput(t) if t.contains(&current)));
        assert_eq!(
            orch.handle_input("/model gpt-4o-mini").await,
            TurnOutcome::CommandOutput("Model switched to: gpt-4o-mini".into())
        );
        assert_eq!(orch.session().config().llm.model, "gpt-4o-mini");
        // mock 提供方下保留注入的网关
        assert_eq!(orch.handle_input("hi").await, TurnOutcome::Reply("ok".into()));
        assert_eq!(gateway.request_count(), 1);
    }

    #[tokio::test]
    async fn test_ask_user_answer_is_sent_back() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::tool_calls(vec![(
                "call_q",
                "ask_user",
                json!({"question": "Tabs or spaces?"}),
            )]),
            ScriptedReply::text("Using spaces"),
        ]));
        let gate = Arc::new(ScriptedGate::default().with_answers(["spaces".to_string()]));
        let (mut orch, _rx) = setup(dir.path(), test_config(), gateway.clone(), gate).await;
        let before = snapshot_count(&orch).await;

        let outcome = orch.handle_input("reformat the file").await;
        assert_eq!(outcome, TurnOutcome::Reply("Using spaces".into()));
        assert_eq!(
            tool_turn_contents(&orch),
            vec![("call_q".to_string(), "spaces".to_string())]
        );
        assert_eq!(snapshot_count(&orch).await, before);
    }

    #[tokio::test]
    async fn test_undo_and_redo_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let original = b"line one\r\nline two\n\tindented\n".to_vec();
        std::fs::write(dir.path().join("notes.txt"), &original).unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([
            ScriptedReply::tool_calls(vec![(
                "e1",
                "edit_file",
                json!({"path": "notes.txt", "old_str": "line two", "new_str": "line 2"}),
            )]),
            ScriptedReply::text("edited"),
        ]));
        let (mut orch, _rx) =
            setup(dir.path(), test_config(), gateway, Arc::new(ScriptedGate::accept_all(1))).await;

        orch.handle_input("rename line two").await;
        let edited = std::fs::read(dir.path().join("notes.txt")).unwrap();
        assert_eq!(edited, b"line one\r\nline 2\n\tindented\n".to_vec());

        assert!(matches!(orch.handle_input("/undo").await, TurnOutcome::CommandOutput(t) if t.starts_with("Undone")));
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), original);

        assert!(matches!(orch.handle_input("/redo").await, TurnOutcome::CommandOutput(t) if t.starts_with("Redone")));
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), edited);

        assert!(matches!(orch.handle_input("/redo").await, TurnOutcome::CommandOutput(t) if t == "Nothing to redo"));
    }

    #[tokio::test]
    async fn test_checkpoint_history_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "v1").unwrap();
        let (mut orch, _rx) = setup(
            dir.path(),
            test_config(),
            Arc::new(ScriptedGateway::new()),
            Arc::new(ScriptedGate::default()),
        )
        .await;

        let TurnOutcome::CommandOutput(saved) = orch.handle_input("/checkpoint v1 state").await else {
            panic!("expected command output");
        };
        let id = saved.split_whitespace().nth(2).unwrap().to_string();
        std::fs::write(dir.path().join("a.txt"), "v2").unwrap();
        orch.handle_input("/checkpoint v2 state").await;

        let TurnOutcome::CommandOutput(history) = orch.handle_input("/history").await else {
            panic!("expected command output");
        };
        assert!(history.lines().next().unwrap().contains("v2 state"));

        assert!(matches!(orch.handle_input(&format!("/restore {id}")).await, TurnOutcome::CommandOutput(t) if t.starts_with("Restored")));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_file_references_and_history_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Notes\nremember the milk").unwrap();
        let gateway = Arc::new(ScriptedGateway::with_replies([ScriptedReply::text("It is about milk.")]));
        let (mut orch, _rx) =
            setup(dir.path(), test_config(), gateway.clone(), Arc::new(ScriptedGate::default())).await;

        orch.handle_input("summarize @notes.md").await;
        let requests = gateway.requests();
        let user = requests[0].iter().rev().find(|t| t.role == Role::User).unwrap();
        assert!(user.content.contains("File `notes.md`:"));
        assert!(user.content.ends_with("summarize `notes.md`"));

        let log = orch.history_log().unwrap();
        assert_eq!(log.count().unwrap(), 2);
        assert!(matches!(orch.handle_input("/log milk").await, TurnOutcome::CommandOutput(t) if t.contains("It is about milk.")));
    }
}
