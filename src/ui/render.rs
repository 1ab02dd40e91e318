//! 事件渲染
//!
//! 把 AgentEvent 转成终端文本：模型输出流式打印，工具结果折叠显示。

use std::io::Write;

use crate::core::{AgentEvent, LoopState, ResultStatus};
use crate::tools::Preview;

/// 工具结果在终端上显示的最大字符数
const MAX_RESULT_DISPLAY_CHARS: usize = 600;

/// 对过长内容做折叠：保留前 N 字 + 省略提示
fn truncate_for_display(content: &str, limit: usize) -> String {
    let total = content.chars().count();
    if total <= limit {
        return content.to_string();
    }
    let head: String = content.chars().take(limit).collect();
    format!("{head}\n... [{} more chars]", total - limit)
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|l| format!("    {l}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 完整预览（确认提示用）
pub fn render_preview(preview: &Preview) -> String {
    match preview {
        Preview::Diff { unified, .. } if unified.trim().is_empty() => {
            format!("  {} (no changes)", preview.headline())
        }
        Preview::Diff { unified, .. } => format!("  {}\n{}", preview.headline(), indent(unified.trim_end())),
        Preview::Command { command } => format!("  $ {command}"),
        Preview::Text { summary } => format!("  {summary}"),
    }
}

/// 事件对应的终端文本；None 表示不显示
///
/// show_previews 为 false 时预览由确认门负责打印。
pub fn render_event(event: &AgentEvent, show_previews: bool) -> Option<String> {
    match event {
        AgentEvent::TextDelta { text } => Some(text.clone()),
        AgentEvent::StreamReset => Some("\n[partial response discarded, retrying]\n".to_string()),
        AgentEvent::AssistantMessage { .. } => Some("\n".to_string()),
        AgentEvent::ToolCall { tool, arguments, .. } => {
            let args = truncate_for_display(arguments, 120);
            Some(format!("-> {tool} {args}\n"))
        }
        AgentEvent::Preview { preview, .. } if show_previews => {
            Some(format!("{}\n", render_preview(preview)))
        }
        AgentEvent::Preview { .. } => None,
        AgentEvent::ToolResult {
            tool,
            status,
            content,
            ..
        } => {
            let mark = match status {
                ResultStatus::Success => "ok",
                ResultStatus::Error => "error",
                ResultStatus::Declined => "declined",
                ResultStatus::Skipped => "skipped",
            };
            Some(format!(
                "<- {tool} [{mark}]\n{}\n",
                indent(&truncate_for_display(content, MAX_RESULT_DISPLAY_CHARS))
            ))
        }
        AgentEvent::SnapshotSaved { id, label } => {
            let short: String = id.chars().take(8).collect();
            Some(format!("   snapshot {short} {label}\n"))
        }
        AgentEvent::Compacted {
            replaced_turns,
            tokens_before,
            tokens_after,
        } => Some(format!(
            "[compacted {replaced_turns} turns: ~{tokens_before} -> ~{tokens_after} tokens]\n"
        )),
        AgentEvent::Warning { text } => Some(format!("warning: {text}\n")),
        AgentEvent::Interrupted => Some("\n[interrupted]\n".to_string()),
        AgentEvent::Error { text } => Some(format!("\nerror: {text}\n")),
        AgentEvent::StateChanged { state } => match state {
            LoopState::Compacting => Some("[compacting conversation...]\n".to_string()),
            _ => None,
        },
    }
}

pub fn print_event(event: &AgentEvent, show_previews: bool) {
    if let Some(text) = render_event(event, show_previews) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_display() {
        let long = "a".repeat(700);
        let out = truncate_for_display(&long, 600);
        assert!(out.ends_with("... [100 more chars]"));
        assert_eq!(truncate_for_display("short", 600), "short");
    }

    #[test]
    fn test_render_tool_result() {
        let ev = AgentEvent::ToolResult {
            id: "c1".into(),
            tool: "write_file".into(),
            status: ResultStatus::Declined,
            content: "write_file declined by user. No changes were made.".into(),
        };
        let text = render_event(&ev, true).unwrap();
        assert!(text.starts_with("<- write_file [declined]"));
    }

    #[test]
    fn test_preview_visibility() {
        let ev = AgentEvent::Preview {
            id: "c1".into(),
            tool: "shell_command".into(),
            preview: Preview::command("ls"),
        };
        assert_eq!(render_event(&ev, true).as_deref(), Some("  $ ls\n"));
        assert!(render_event(&ev, false).is_none());
    }

    #[test]
    fn test_render_diff_preview() {
        let p = Preview::diff("a.txt", "one\n", "two\n");
        let text = render_preview(&p);
        assert!(text.contains("a.txt (+1 -1)"));
        assert!(text.contains("    -one"));
        assert!(text.contains("    +two"));
    }
}
