//! 编排循环
//!
//! Idle -> (Compacting) -> AwaitingModel -> ExecutingTools -> AwaitingModel ... -> Idle
//!
//! - 斜杠命令在这里短路，不请求模型
//! - 压缩只在 Idle -> AwaitingModel 边界检查，工具循环中途不会改动 turn 下标
//! - 工具调用按模型给出的顺序串行分发；结果先回填给模型，下一次请求提交后才对外展示
//! - 每连续 iteration_warning_threshold 轮纯工具调用追加一条提醒，不设硬上限
//! - 瞬时网关错误重试一次；失败的那次请求不写入会话

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::commands::{self, SlashCommand};
use crate::core::references::expand_references;
use crate::core::{
    AgentEvent, EventSink, GatewayError, LoopState, SessionContext, SessionSupervisor,
};
use crate::llm::retry::retry_delay;
use crate::llm::{create_gateway_from_config, GatewayEvent, ModelGateway, ModelRequest, ModelResponse, ResponseAssembler};
use crate::memory::{CompactionReport, Compactor, ContextBudget, Conversation, HistoryLog, Role, Turn};
use crate::snapshot::UndoHistory;
use crate::tools::{SafeFs, ToolDispatcher, ToolOutcome, ToolSpec};

/// 一次输入的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 模型的最终回复
    Reply(String),
    /// 斜杠命令的输出
    CommandOutput(String),
    /// 用户中断，回到 Idle
    Interrupted,
    /// 网关失败，本轮放弃
    Aborted(String),
    Exit,
    /// 空输入
    Ignored,
}

pub struct Orchestrator {
    session: SessionContext,
    gateway: Arc<dyn ModelGateway>,
    dispatcher: ToolDispatcher,
    tool_specs: Vec<ToolSpec>,
    history: UndoHistory,
    compactor: Compactor,
    conversation: Conversation,
    log: Option<HistoryLog>,
    fs: SafeFs,
    sink: EventSink,
    supervisor: SessionSupervisor,
}

impl Orchestrator {
    pub(crate) fn new(
        session: SessionContext,
        gateway: Arc<dyn ModelGateway>,
        dispatcher: ToolDispatcher,
        history: UndoHistory,
        log: Option<HistoryLog>,
        sink: EventSink,
    ) -> Self {
        let cfg = session.config();
        let compactor = Compactor::new(
            cfg.agent.compaction_threshold_tokens,
            cfg.agent.compaction_keep_recent,
        );
        let tool_specs = dispatcher.registry().specs();
        let fs = SafeFs::new(session.workspace());
        Self {
            session,
            gateway,
            dispatcher,
            tool_specs,
            history,
            compactor,
            conversation: Conversation::new(),
            log,
            fs,
            sink,
            supervisor: SessionSupervisor::new(),
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> LoopState {
        self.sink.state()
    }

    /// 前端用于 Ctrl+C 的句柄
    pub fn supervisor(&self) -> SessionSupervisor {
        self.supervisor.clone()
    }

    pub fn undo_history(&self) -> &UndoHistory {
        &self.history
    }

    pub fn history_log(&self) -> Option<&HistoryLog> {
        self.log.as_ref()
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub async fn handle_input(&mut self, input: &str) -> TurnOutcome {
        let input = input.trim();
        if self.supervisor.is_shutdown() || self.state() == LoopState::Terminated {
            return TurnOutcome::Exit;
        }
        if input.is_empty() {
            return TurnOutcome::Ignored;
        }
        if commands::is_command(input) {
            return match commands::parse(input) {
                Ok(resolved) => {
                    if let Some(full) = &resolved.expanded_from {
                        tracing::debug!(input = %input, command = %full, "resolved command prefix");
                    }
                    self.run_command(resolved.command).await
                }
                Err(msg) => TurnOutcome::CommandOutput(msg),
            };
        }

        let expansion = expand_references(input, &self.fs);
        for warning in expansion.warnings {
            self.sink.send(AgentEvent::Warning { text: warning });
        }
        self.run_turn(expansion.text).await
    }

    fn append(&mut self, turn: Turn) {
        if let Some(log) = &self.log {
            log.record(&turn);
        }
        self.conversation.push(turn);
    }

    fn warn(&self, text: impl Into<String>) {
        self.sink.send(AgentEvent::Warning { text: text.into() });
    }

    async fn run_turn(&mut self, text: String) -> TurnOutcome {
        let token = self.supervisor.begin_turn();
        if let Err(e) = self.session.config().validate() {
            self.sink.send(AgentEvent::Error { text: e.to_string() });
            return TurnOutcome::Aborted(e.to_string());
        }

        // 边界处检查压缩：失败只提醒，下次再试
        let _ = self.compact(false).await;

        self.append(Turn::user(text));
        let warn_every = self.session.config().agent.iteration_warning_threshold.max(1);
        let mut iterations = 0usize;
        let mut pending: Vec<ToolOutcome> = Vec::new();

        loop {
            self.sink.set_state(LoopState::AwaitingModel);
            let response = match self.request_model(&token, &mut pending).await {
                Ok(Some(response)) => response,
                Ok(None) => return self.interrupted(&mut pending),
                Err(e) => {
                    self.flush_results(&mut pending);
                    tracing::error!(error = %e, "model request failed");
                    self.sink.send(AgentEvent::Error { text: e.to_string() });
                    self.sink.set_state(LoopState::Idle);
                    return TurnOutcome::Aborted(e.to_string());
                }
            };
            self.flush_results(&mut pending);

            if response.tool_calls.is_empty() {
                let text = response.text;
                self.append(Turn::assistant(text.clone()));
                self.sink.send(AgentEvent::AssistantMessage { text: text.clone() });
                self.sink.set_state(LoopState::Idle);
                return TurnOutcome::Reply(text);
            }

            let calls = response.tool_calls.clone();
            if !response.text.is_empty() {
                self.sink.send(AgentEvent::AssistantMessage {
                    text: response.text.clone(),
                });
            }
            self.append(Turn::assistant_with_calls(response.text, response.tool_calls));
            iterations += 1;

            self.sink.set_state(LoopState::ExecutingTools);
            for (i, call) in calls.iter().enumerate() {
                if token.is_cancelled() {
                    for skipped in &calls[i..] {
                        let outcome = ToolOutcome::skipped(skipped);
                        self.append(Turn::tool_result(&outcome.call_id, &outcome.content));
                        pending.push(outcome);
                    }
                    break;
                }
                self.sink.send(AgentEvent::ToolCall {
                    id: call.id.clone(),
                    tool: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
                let outcome = self
                    .dispatcher
                    .dispatch(call, self.session.auto_accept(), &self.sink, &mut self.history)
                    .await;
                self.append(Turn::tool_result(&outcome.call_id, &outcome.content));
                pending.push(outcome);
            }
            if token.is_cancelled() {
                return self.interrupted(&mut pending);
            }

            if iterations % warn_every == 0 {
                let text = format!(
                    "{iterations} tool iterations without a final answer. The model may be stuck; continuing."
                );
                tracing::warn!(iterations, "tool loop running long");
                self.append(Turn::system(text.clone()));
                self.warn(text);
            }
        }
    }

    fn interrupted(&mut self, pending: &mut Vec<ToolOutcome>) -> TurnOutcome {
        self.flush_results(pending);
        tracing::info!("turn interrupted by user");
        self.sink.send(AgentEvent::Interrupted);
        self.sink.set_state(LoopState::Idle);
        TurnOutcome::Interrupted
    }

    fn flush_results(&self, pending: &mut Vec<ToolOutcome>) {
        for outcome in pending.drain(..) {
            self.sink.send(AgentEvent::ToolResult {
                id: outcome.call_id,
                tool: outcome.tool,
                status: outcome.status,
                content: outcome.content,
            });
        }
    }

    /// 请求模型；返回 None 表示被中断
    async fn request_model(
        &self,
        token: &CancellationToken,
        pending: &mut Vec<ToolOutcome>,
    ) -> Result<Option<ModelResponse>, GatewayError> {
        let llm = &self.session.config().llm;
        let attempts = 1 + llm.max_retries;
        let mut attempt = 0u32;
        loop {
            let mut streamed = false;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                r = self.stream_once(pending, &mut streamed) => r,
            };
            match result {
                Ok(response) => return Ok(Some(response)),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    // 失败那次已经展示的文本作废
                    if streamed {
                        self.sink.send(AgentEvent::StreamReset);
                    }
                    let delay = retry_delay(llm.retry_delay_ms, attempt);
                    tracing::warn!(error = %e, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "transient gateway error, retrying");
                    self.warn(format!("{e}; retrying"));
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn stream_once(
        &self,
        pending: &mut Vec<ToolOutcome>,
        streamed: &mut bool,
    ) -> Result<ModelResponse, GatewayError> {
        let system = self.session.system_prompt();
        let turns = self.conversation.sanitized();
        let request = ModelRequest {
            system: &system,
            turns: &turns,
            tools: &self.tool_specs,
        };
        let mut stream = self.gateway.submit(request).await?;
        // 结果已随这次请求交给模型
        self.flush_results(pending);

        let mut assembler = ResponseAssembler::new();
        while let Some(item) = stream.next().await {
            let event = item?;
            match &event {
                GatewayEvent::TextDelta(text) => {
                    *streamed = true;
                    self.sink.send(AgentEvent::TextDelta { text: text.clone() });
                }
                GatewayEvent::Finish(response) => {
                    if response.text.is_empty() && response.tool_calls.is_empty() && assembler.has_content() {
                        return Ok(assembler.finish());
                    }
                    return Ok(response.clone());
                }
                GatewayEvent::ToolCallDelta { .. } => {}
            }
            assembler.push(&event);
        }
        Ok(assembler.finish())
    }

    /// 压缩；force 为 false 时只在超过阈值时执行
    async fn compact(&mut self, force: bool) -> Result<Option<CompactionReport>, GatewayError> {
        if !force && !self.compactor.should_compact(&self.conversation) {
            return Ok(None);
        }
        self.sink.set_state(LoopState::Compacting);
        let result = self
            .compactor
            .compact(&mut self.conversation, self.gateway.as_ref())
            .await;
        self.sink.set_state(LoopState::Idle);
        match &result {
            Ok(Some(report)) => {
                if let (Some(log), Some(summary)) = (&self.log, self.conversation.turns().first()) {
                    log.record(summary);
                }
                self.sink.send(AgentEvent::Compacted {
                    replaced_turns: report.replaced_turns,
                    tokens_before: report.tokens_before,
                    tokens_after: report.tokens_after,
                });
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "compaction failed, keeping full history");
                self.warn(format!("Compaction failed ({e}); will retry later."));
            }
        }
        result
    }

    async fn run_command(&mut self, command: SlashCommand) -> TurnOutcome {
        let output = match command {
            SlashCommand::Help => commands::help_text(),
            SlashCommand::Yolo => {
                if self.session.toggle_auto_accept() {
                    "Auto-accept ON: changes are applied without confirmation.".to_string()
                } else {
                    "Auto-accept OFF: changes require confirmation.".to_string()
                }
            }
            SlashCommand::Config => self.describe_config(),
            SlashCommand::Model(None) => format!(
                "model: {} ({})",
                self.session.config().llm.model,
                self.gateway.name()
            ),
            SlashCommand::Model(Some(name)) => self.switch_model(&name),
            SlashCommand::Undo(n) => match self.history.undo(n).await {
                Ok(record) => format!("Undone to {} ({})", record.id.short(), record.label),
                Err(e) => e.to_string(),
            },
            SlashCommand::Redo => match self.history.redo().await {
                Ok(record) => format!("Redone to {} ({})", record.id.short(), record.label),
                Err(e) => e.to_string(),
            },
            SlashCommand::Checkpoint(label) => {
                let label = label.unwrap_or_else(|| "manual checkpoint".to_string());
                let id = self.history.checkpoint(&label).await;
                if id.is_versioned() {
                    self.sink.send(AgentEvent::SnapshotSaved {
                        id: id.to_string(),
                        label: label.clone(),
                    });
                    format!("Checkpoint saved: {} {}", id.short(), label)
                } else {
                    "Snapshots are unavailable; nothing was saved.".to_string()
                }
            }
            SlashCommand::History => match self.history.list(20).await {
                Ok(records) if records.is_empty() => "No snapshots yet.".to_string(),
                Ok(records) => records
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        format!(
                            "{} {}  {}  {}",
                            if i == 0 { "*" } else { " " },
                            r.id.short(),
                            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                            r.label
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => e.to_string(),
            },
            SlashCommand::Restore(id) => match self.history.restore(&id).await {
                Ok(restored) if restored.previous.is_versioned() => format!(
                    "Restored {} ({}); previous state saved as {}",
                    restored.record.id.short(),
                    restored.record.label,
                    restored.previous.short()
                ),
                Ok(restored) => format!(
                    "Restored {} ({})",
                    restored.record.id.short(),
                    restored.record.label
                ),
                Err(e) => e.to_string(),
            },
            SlashCommand::Compact => match self.compact(true).await {
                Ok(Some(r)) => format!(
                    "Compacted {} turns: ~{} -> ~{} tokens",
                    r.replaced_turns, r.tokens_before, r.tokens_after
                ),
                Ok(None) => "Nothing to compact.".to_string(),
                Err(e) => format!("Compaction failed: {e}"),
            },
            SlashCommand::Clear => {
                self.conversation.clear();
                "Conversation cleared.".to_string()
            }
            SlashCommand::Cost => self.describe_cost(),
            SlashCommand::Attach(path) => self.attach(&path),
            SlashCommand::Log(query) => self.describe_log(query.as_deref()),
            SlashCommand::Tools => self
                .dispatcher
                .registry()
                .specs()
                .iter()
                .map(|s| {
                    let flag = if self.dispatcher.registry().is_mutating(&s.name) {
                        " (mutating)"
                    } else {
                        ""
                    };
                    format!("  {}{}: {}", s.name, flag, s.description)
                })
                .collect::<Vec<_>>()
                .join("\n"),
            SlashCommand::Quit => {
                self.sink.set_state(LoopState::Terminated);
                self.supervisor.shutdown();
                return TurnOutcome::Exit;
            }
        };
        TurnOutcome::CommandOutput(output)
    }

    /// 换模型；mock 提供方保留当前网关（测试注入的脚本网关）
    fn switch_model(&mut self, name: &str) -> String {
        self.session.set_model(name);
        if !self.session.config().llm.provider.eq_ignore_ascii_case("mock") {
            self.gateway = create_gateway_from_config(self.session.config());
        }
        tracing::info!(model = %name, gateway = %self.gateway.name(), "model switched");
        format!("Model switched to: {name}")
    }

    fn describe_config(&self) -> String {
        let cfg = self.session.config();
        let body = serde_json::to_string_pretty(cfg).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        format!(
            "workspace: {}\ngateway: {}\nsnapshots: {}\nauto_accept: {}\n{}",
            self.session.workspace().display(),
            self.gateway.name(),
            self.history.store().backend(),
            self.session.auto_accept(),
            body
        )
    }

    fn describe_cost(&self) -> String {
        let budget = ContextBudget::new(self.conversation.estimated_tokens(), self.compactor.threshold());
        let mut out = format!(
            "Messages: {} (tool results: {})\nContext size: ~{} tokens of {} ({:.0}%)",
            self.conversation.len(),
            self.conversation.count_role(Role::Tool),
            budget.used,
            budget.threshold,
            budget.ratio() * 100.0
        );
        if budget.exceeded() {
            out.push_str("\nContext is over the compaction threshold; it will be compacted before the next request.");
        } else if budget.near_limit() {
            out.push_str("\nContext is close to the compaction threshold. Consider /compact.");
        }
        out
    }

    fn attach(&mut self, path: &str) -> String {
        let resolved = match self.fs.resolve(path) {
            Ok(p) if p.is_file() => p,
            Ok(_) => return format!("File not found: {path}"),
            Err(e) => return e.to_string(),
        };
        match std::fs::read_to_string(&resolved) {
            Ok(content) => {
                let chars = content.chars().count();
                self.append(Turn::user(format!("File attached: `{path}`\n```\n{content}\n```")));
                format!("Attached {path} ({chars} chars) to the conversation.")
            }
            Err(e) => format!("Cannot read {path}: {e}"),
        }
    }

    fn describe_log(&self, query: Option<&str>) -> String {
        let Some(log) = &self.log else {
            return "History log is disabled.".to_string();
        };
        let entries = match query {
            Some(q) => log.search(q, 20),
            None => log.recent(20),
        };
        match entries {
            Ok(entries) if entries.is_empty() => "No matching log entries.".to_string(),
            Ok(entries) => entries
                .iter()
                .map(|e| {
                    let first = e.content.lines().next().unwrap_or("");
                    let first: String = first.chars().take(120).collect();
                    let calls = if e.tool_calls.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", e.tool_calls.join(", "))
                    };
                    format!(
                        "{} {:<9} {}{}",
                        e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        e.role.as_str(),
                        first,
                        calls
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Failed to read history log: {e}"),
        }
    }
}
