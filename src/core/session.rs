//! 会话上下文：配置 + 工作区 + 运行期开关，构造一次后按引用传递

use std::path::{Path, PathBuf};

use crate::config::AppConfig;

const DEFAULT_SYSTEM_PROMPT: &str = "You are amas, an AI coding assistant working inside the user's project.\n\
Use the provided tools to read, search and modify files or run shell commands.\n\
Prefer edit_file for small changes and write_file only for full rewrites.\n\
Every change is shown to the user for approval and can be undone.";

#[derive(Debug, Clone)]
pub struct SessionContext {
    config: AppConfig,
    workspace: PathBuf,
    auto_accept: bool,
}

impl SessionContext {
    pub fn new(config: AppConfig, workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let workspace = workspace.canonicalize().unwrap_or(workspace);
        Self {
            auto_accept: config.agent.auto_accept,
            config,
            workspace,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn set_model(&mut self, model: &str) {
        self.config.llm.model = model.to_string();
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn auto_accept(&self) -> bool {
        self.auto_accept
    }

    /// 切换自动接受，返回新值
    pub fn toggle_auto_accept(&mut self) -> bool {
        self.auto_accept = !self.auto_accept;
        self.auto_accept
    }

    /// 发给模型的 system prompt：配置（或默认）+ 工作区信息
    pub fn system_prompt(&self) -> String {
        let base = self
            .config
            .app
            .system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        format!(
            "{}\n\nWorking directory: {}\nPlatform: {}",
            base,
            self.workspace.display(),
            std::env::consts::OS
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_and_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = SessionContext::new(AppConfig::default(), dir.path());
        assert!(!ctx.auto_accept());
        assert!(ctx.toggle_auto_accept());
        assert!(ctx.system_prompt().starts_with("You are amas"));
        assert!(ctx.system_prompt().contains("Working directory:"));
    }

    #[test]
    fn test_custom_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.app.system_prompt = Some("Be terse.".into());
        let ctx = SessionContext::new(cfg, dir.path());
        assert!(ctx.system_prompt().starts_with("Be terse."));
    }
}
