//! Shell 执行器
//!
//! 在工作区根目录通过 sh -c / cmd /C 执行；每次调用带超时（超时即杀掉子进程），
//! stdout 与 stderr 合并返回，非零退出码视为执行失败。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::process::Command;

use crate::core::ToolError;
use crate::tools::{Preview, Tool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShellArgs {
    /// Shell command to execute
    pub command: String,
    /// Timeout in seconds (defaults to the configured shell timeout)
    pub timeout: Option<u64>,
}

/// Shell 工具
pub struct ShellTool {
    workdir: PathBuf,
    timeout_secs: u64,
    max_output_chars: usize,
}

impl ShellTool {
    pub fn new(workdir: impl Into<PathBuf>, timeout_secs: u64, max_output_chars: usize) -> Self {
        Self {
            workdir: workdir.into(),
            timeout_secs,
            max_output_chars,
        }
    }

    fn build_command(&self, command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn truncate(&self, mut output: String) -> String {
        if let Some((idx, _)) = output.char_indices().nth(self.max_output_chars) {
            output.truncate(idx);
            output.push_str("\n\n[output truncated]");
        }
        output
    }
}

#[async_trait]
impl Tool for ShellTool {
    type Args = ShellArgs;

    fn name(&self) -> &str {
        "shell_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace and return stdout + stderr. Has a 30s timeout by default."
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn target(&self, args: &ShellArgs) -> String {
        args.command.chars().take(60).collect()
    }

    async fn preview(&self, args: &ShellArgs) -> Result<Option<Preview>, ToolError> {
        Ok(Some(Preview::command(args.command.trim())))
    }

    async fn execute(&self, args: ShellArgs) -> Result<String, ToolError> {
        let command = args.command.trim();
        if command.is_empty() {
            return Err(ToolError::Validation("empty command".to_string()));
        }
        let timeout_secs = args.timeout.filter(|t| *t > 0).unwrap_or(self.timeout_secs);
        tracing::info!(command = %command, timeout_secs, "shell tool execute");

        let child = self
            .build_command(command)
            .spawn()
            .map_err(|e| ToolError::Execution(format!("running command: {e}")))?;

        // 超时后 future 被丢弃，kill_on_drop 负责结束子进程
        let output = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| ToolError::Timeout(timeout_secs))?
        .map_err(|e| ToolError::Execution(format!("running command: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.to_string();
        if !stderr.is_empty() {
            if text.is_empty() {
                text = stderr.to_string();
            } else {
                text.push_str("\n[stderr]\n");
                text.push_str(&stderr);
            }
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            text.push_str(&format!("\n[exit code: {code}]"));
            return Err(ToolError::Execution(self.truncate(text.trim().to_string())));
        }

        Ok(self.truncate(text))
    }
}
