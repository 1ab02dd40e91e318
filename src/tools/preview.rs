//! 变更预览：文件改动生成统一 diff，Shell 命令原样展示

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

/// 在确认前展示给用户的预览
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Preview {
    Diff {
        path: String,
        unified: String,
        added: usize,
        removed: usize,
    },
    Command {
        command: String,
    },
    Text {
        summary: String,
    },
}

impl Preview {
    /// old 为空字符串表示新建文件，new 为空字符串表示删除
    pub fn diff(path: &str, old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let (mut added, mut removed) = (0, 0);
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Insert => added += 1,
                ChangeTag::Delete => removed += 1,
                ChangeTag::Equal => {}
            }
        }
        let unified = diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string();
        Preview::Diff {
            path: path.to_string(),
            unified,
            added,
            removed,
        }
    }

    pub fn command(command: impl Into<String>) -> Self {
        Preview::Command {
            command: command.into(),
        }
    }

    pub fn text(summary: impl Into<String>) -> Self {
        Preview::Text {
            summary: summary.into(),
        }
    }

    /// 单行摘要（事件、日志用）
    pub fn headline(&self) -> String {
        match self {
            Preview::Diff {
                path,
                added,
                removed,
                ..
            } => format!("{path} (+{added} -{removed})"),
            Preview::Command { command } => format!("$ {command}"),
            Preview::Text { summary } => summary.lines().next().unwrap_or("").to_string(),
        }
    }
}
