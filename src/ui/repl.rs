//! 行式终端 REPL
//!
//! 一个任务内同时推进编排器和事件渲染（select），保证输出顺序；
//! Ctrl+C 监听只取消当前轮，退出用 /quit 或 Ctrl+D。

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};

use crate::core::{AgentEvent, Orchestrator, TurnOutcome};
use crate::tools::{ConfirmationGate, Decision, PendingConfirmation};
use crate::ui::render::{print_event, render_preview};

/// REPL 与确认门共享的标准输入
pub type SharedInput = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn shared_stdin() -> SharedInput {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

fn prompt(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{text}");
    let _ = out.flush();
}

pub fn parse_decision(answer: &str) -> Decision {
    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" | "a" | "accept" => Decision::Accepted,
        _ => Decision::Declined,
    }
}

/// 终端确认门：打印完整预览并读取 y/n；EOF 视为拒绝
pub struct TerminalGate {
    input: SharedInput,
}

impl TerminalGate {
    pub fn new(input: SharedInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl ConfirmationGate for TerminalGate {
    async fn confirm(&self, pending: &PendingConfirmation) -> Decision {
        println!("{}", render_preview(&pending.preview));
        prompt(&format!("Apply {}? [y/N] ", pending.tool_call.name));
        match self.input.lock().await.next_line().await {
            Ok(Some(answer)) => parse_decision(&answer),
            Ok(None) => Decision::Declined,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read confirmation");
                Decision::Declined
            }
        }
    }

    async fn ask(&self, question: &str) -> Option<String> {
        println!("\n[question] {question}");
        prompt("answer> ");
        match self.input.lock().await.next_line().await {
            Ok(Some(answer)) => Some(answer),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read answer");
                None
            }
        }
    }
}

async fn banner(orchestrator: &Orchestrator) {
    let session = orchestrator.session();
    println!("amas - terminal coding assistant");
    println!("  workspace: {}", session.workspace().display());
    println!(
        "  model: {} ({})",
        session.config().llm.model,
        orchestrator.gateway_name()
    );
    let store = orchestrator.undo_history().store();
    match store.head().await {
        Some(head) => println!(
            "  snapshots: {} (head {} {})",
            store.backend(),
            head.id.short(),
            head.label
        ),
        None => println!("  snapshots: {}", store.backend()),
    }
    if let Some(log) = orchestrator.history_log() {
        if let Ok(n) = log.count() {
            if n > 0 {
                println!("  history: {n} earlier log records");
            }
        }
    }
    if session.auto_accept() {
        println!("  auto-accept is ON");
    }
    println!("Type /help for commands, /quit to exit.\n");
}

pub async fn run(
    mut orchestrator: Orchestrator,
    input: SharedInput,
    mut events: mpsc::UnboundedReceiver<AgentEvent>,
) -> anyhow::Result<()> {
    banner(&orchestrator).await;

    let supervisor = orchestrator.supervisor();
    let interrupter = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                supervisor.cancel();
            }
        })
    };

    loop {
        prompt("> ");
        let line = input.lock().await.next_line().await?;
        let Some(line) = line else {
            println!();
            break;
        };

        let show_previews = orchestrator.session().auto_accept();
        let outcome = {
            let turn = orchestrator.handle_input(&line);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    outcome = &mut turn => break outcome,
                    Some(event) = events.recv() => print_event(&event, show_previews),
                }
            }
        };
        while let Ok(event) = events.try_recv() {
            print_event(&event, show_previews);
        }

        match outcome {
            TurnOutcome::CommandOutput(text) => println!("{text}"),
            TurnOutcome::Exit => break,
            TurnOutcome::Reply(_)
            | TurnOutcome::Interrupted
            | TurnOutcome::Aborted(_)
            | TurnOutcome::Ignored => {}
        }
    }

    interrupter.abort();
    supervisor.shutdown();
    println!("Goodbye!");
    Ok(())
}
