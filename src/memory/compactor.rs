//! 上下文压缩
//!
//! 估算 token 超过阈值时，把较早的 turn（head）摘要成一条 system turn，最近的 keep_recent 条原样保留。
//! 分界点只落在「head 中发出的调用都已在 head 内得到结果」的位置。
//! 摘要失败时不改动历史，下次触发再试。

use std::collections::HashSet;

use crate::core::GatewayError;
use crate::llm::ModelGateway;
use crate::memory::{Conversation, Role, Turn};

/// 摘要 turn 的前缀
pub const SUMMARY_PREFIX: &str = "Previous conversation summary:";

const SUMMARY_INSTRUCTIONS: &str = "Summarize this conversation concisely, preserving:\n\
- Key decisions and conclusions\n\
- Files created, edited, or deleted (with paths)\n\
- Important context and user preferences\n\
- Current state of the task\n\n";

const TOOL_EXCERPT_CHARS: usize = 200;
const TEXT_EXCERPT_CHARS: usize = 500;

/// 一次压缩的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub replaced_turns: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

#[derive(Debug, Clone)]
pub struct Compactor {
    threshold_tokens: usize,
    keep_recent: usize,
}

impl Compactor {
    pub fn new(threshold_tokens: usize, keep_recent: usize) -> Self {
        Self {
            threshold_tokens,
            keep_recent,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold_tokens
    }

    pub fn should_compact(&self, conversation: &Conversation) -> bool {
        conversation.estimated_tokens() > self.threshold_tokens
    }

    /// 摘要并替换 head；返回 None 表示没有合法分界点（历史太短或调用对跨越了全部候选位置）
    pub async fn compact(
        &self,
        conversation: &mut Conversation,
        gateway: &dyn ModelGateway,
    ) -> Result<Option<CompactionReport>, GatewayError> {
        let Some(boundary) = find_boundary(conversation.turns(), self.keep_recent) else {
            return Ok(None);
        };
        let tokens_before = conversation.estimated_tokens();
        let prompt = format!(
            "{}{}",
            SUMMARY_INSTRUCTIONS,
            transcript(&conversation.turns()[..boundary])
        );
        let summary = gateway.summarize(&prompt).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(GatewayError::InvalidResponse("empty summary".to_string()));
        }
        conversation.replace_prefix(boundary, Turn::system(format!("{SUMMARY_PREFIX}\n\n{summary}")));
        let report = CompactionReport {
            replaced_turns: boundary,
            tokens_before,
            tokens_after: conversation.estimated_tokens(),
        };
        tracing::info!(
            replaced = report.replaced_turns,
            before = report.tokens_before,
            after = report.tokens_after,
            "conversation compacted"
        );
        Ok(Some(report))
    }
}

/// 找分界点 b（head = turns[..b]）：从 len - keep_recent 开始向前退，
/// 直到 turns[b..] 中没有 tool turn 引用 b 之前发出的调用。head 至少 2 条。
pub fn find_boundary(turns: &[Turn], keep_recent: usize) -> Option<usize> {
    let mut b = turns.len().checked_sub(keep_recent)?;
    while b >= 2 {
        if is_clean_cut(turns, b) {
            return Some(b);
        }
        b -= 1;
    }
    None
}

fn is_clean_cut(turns: &[Turn], b: usize) -> bool {
    let issued_before: HashSet<&str> = turns[..b]
        .iter()
        .flat_map(|t| t.tool_calls.iter().map(|c| c.id.as_str()))
        .collect();
    turns[b..].iter().all(|t| {
        t.tool_call_id
            .as_deref()
            .map(|id| !issued_before.contains(id))
            .unwrap_or(true)
    })
}

fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

fn transcript(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        match turn.role {
            Role::Tool => {
                out.push_str(&format!("[tool result] {}\n", excerpt(&turn.content, TOOL_EXCERPT_CHARS)));
            }
            role => {
                if !turn.content.is_empty() {
                    out.push_str(&format!(
                        "[{}] {}\n",
                        role.as_str(),
                        excerpt(&turn.content, TEXT_EXCERPT_CHARS)
                    ));
                }
                for call in &turn.tool_calls {
                    out.push_str(&format!(
                        "[{} called {}] {}\n",
                        role.as_str(),
                        call.name,
                        excerpt(&call.arguments, TOOL_EXCERPT_CHARS)
                    ));
                }
            }
        }
    }
    out
}
