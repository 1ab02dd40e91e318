//! Amas - 终端编码助手
//!
//! 入口：初始化日志、加载配置、构建编排器并运行 REPL。

use std::path::PathBuf;
use std::sync::Arc;

use amas::config::{load_config, AppConfig};
use amas::core::OrchestratorBuilder;
use amas::ui::{self, TerminalGate};
use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "amas")]
#[command(about = "Terminal coding assistant with confirmed edits and undo", long_about = None)]
#[command(version)]
struct CliArgs {
    /// Extra config file layered over config/default.toml and .amas/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace root (default: app.workspace_root or the current directory)
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Model name override
    #[arg(short, long)]
    model: Option<String>,

    /// Apply changes without asking for confirmation
    #[arg(long)]
    yolo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    amas::observability::init();

    let mut config = load_config(args.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    if args.yolo {
        config.agent.auto_accept = true;
    }
    if let Some(model) = args.model {
        config.llm.model = model;
    }
    config.validate().context("Invalid configuration")?;

    let workspace = args.workspace.unwrap_or_else(|| config.workspace_root());
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("Failed to create workspace {}", workspace.display()))?;

    let input = ui::shared_stdin();
    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = OrchestratorBuilder::new(config, workspace)
        .with_gate(Arc::new(TerminalGate::new(input.clone())))
        .with_events(tx)
        .build()
        .await;

    ui::run(orchestrator, input, rx).await.context("REPL failed")?;
    Ok(())
}
