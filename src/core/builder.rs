//! 编排器构建：统一的初始化逻辑
//!
//! 终端前端与测试共用同一套工具注册；未显式注入的部件按配置创建。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::core::{AgentEvent, EventSink, Orchestrator, SessionContext};
use crate::llm::{create_gateway_from_config, ModelGateway};
use crate::memory::HistoryLog;
use crate::snapshot::{open_store, SnapshotStore, UndoHistory};
use crate::tools::{
    AskUserTool, AutoAcceptGate, ConfirmationGate, CreateFileTool, DeleteFileTool, EditFileTool,
    FetchUrlTool, IgnoreRules, ListFilesTool, ReadFileTool, ReplaceLinesTool, SafeFs,
    SearchFilesTool, ShellTool, ToolDispatcher, ToolRegistry, WriteFileTool,
};

pub struct OrchestratorBuilder {
    config: AppConfig,
    workspace: PathBuf,
    gateway: Option<Arc<dyn ModelGateway>>,
    gate: Option<Arc<dyn ConfirmationGate>>,
    store: Option<Arc<dyn SnapshotStore>>,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            config,
            workspace: workspace.into(),
            gateway: None,
            gate: None,
            store: None,
            events: None,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn ModelGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// 确认门；未设置时全部接受
    pub fn with_gate(mut self, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn gate(&self) -> Arc<dyn ConfirmationGate> {
        self.gate.clone().unwrap_or_else(|| Arc::new(AutoAcceptGate))
    }

    /// 内置工具 + 配置中额外声明为变更类的工具名
    pub fn build_tool_registry(&self) -> ToolRegistry {
        let fs = SafeFs::new(&self.workspace);
        let ignore = IgnoreRules::new(&self.config.tools.ignore);
        let mut tools = ToolRegistry::new();

        tools.register(ReadFileTool::new(fs.clone()));
        tools.register(ListFilesTool::new(fs.clone(), ignore.clone()));
        tools.register(SearchFilesTool::new(fs.clone(), ignore));
        tools.register(WriteFileTool::new(fs.clone()));
        tools.register(CreateFileTool::new(fs.clone()));
        tools.register(EditFileTool::new(fs.clone()));
        tools.register(ReplaceLinesTool::new(fs.clone()));
        tools.register(DeleteFileTool::new(fs.clone()));
        tools.register(ShellTool::new(
            fs.root(),
            self.config.tools.shell_timeout_secs,
            self.config.tools.max_output_chars,
        ));
        tools.register(AskUserTool::new(self.gate()));
        if self.config.tools.web.enabled {
            tools.register(FetchUrlTool::new(&self.config.tools.web));
        }

        tools.mark_mutating(self.config.agent.mutating_tools.iter());
        tools
    }

    pub async fn build(self) -> Orchestrator {
        let registry = Arc::new(self.build_tool_registry());
        let gate = self.gate();
        let session = SessionContext::new(self.config.clone(), &self.workspace);

        let gateway = self
            .gateway
            .unwrap_or_else(|| create_gateway_from_config(&self.config));
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config, session.workspace()).await,
        };
        let log = self.config.history.enabled.then(|| {
            HistoryLog::new(
                self.config.history_path(session.workspace()),
                self.config.history.max_content_chars,
            )
        });
        tracing::info!(
            workspace = %session.workspace().display(),
            gateway = gateway.name(),
            snapshots = store.backend(),
            tools = registry.len(),
            "orchestrator ready"
        );

        Orchestrator::new(
            session,
            gateway,
            ToolDispatcher::new(registry, gate),
            UndoHistory::new(store),
            log,
            EventSink::new(self.events),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_has_builtin_tools() {
        let dir = tempfile::tempdir().unwrap();
        let builder = OrchestratorBuilder::new(AppConfig::default(), dir.path());
        let registry = builder.build_tool_registry();
        for name in [
            "read_file",
            "list_files",
            "search_files",
            "write_file",
            "create_file",
            "edit_file",
            "replace_lines",
            "delete_file",
            "shell_command",
            "ask_user",
            "fetch_url",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(registry.is_mutating("shell_command"));
        assert!(!registry.is_mutating("read_file"));
        assert!(!registry.is_mutating("fetch_url"));
        assert!(!registry.is_mutating("ask_user"));
    }

    #[test]
    fn test_web_tool_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.tools.web.enabled = false;
        let registry = OrchestratorBuilder::new(cfg, dir.path()).build_tool_registry();
        assert!(registry.get("fetch_url").is_none());
        assert!(registry.get("ask_user").is_some());
    }

    #[test]
    fn test_config_can_mark_more_tools_mutating() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.agent.mutating_tools.push("search_files".into());
        let registry = OrchestratorBuilder::new(cfg, dir.path()).build_tool_registry();
        assert!(registry.is_mutating("search_files"));
    }
}
