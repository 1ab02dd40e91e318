//! 对话状态：有序的 Turn 列表
//!
//! 只有编排循环会修改它：push 追加、replace_prefix 由压缩器替换头部。
//! 不变式：每个 tool turn 的 tool_call_id 都指向它之前某个 assistant turn 中的调用。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::TokenEstimator;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 模型发出的一次工具调用；arguments 保留原始 JSON 文本，由分发器解析校验
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// 仅 assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// 压缩摘要与循环提醒
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// 估算 token：内容 + 调用参数 + 每条固定开销
    pub fn estimated_tokens(&self) -> usize {
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|c| TokenEstimator::estimate(&c.name) + TokenEstimator::estimate(&c.arguments))
            .sum();
        TokenEstimator::estimate(&self.content) + calls + 4
    }
}

/// 会话历史
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// 用一条摘要替换前 `count` 条（压缩专用）
    pub fn replace_prefix(&mut self, count: usize, replacement: Turn) {
        let count = count.min(self.turns.len());
        self.turns.splice(..count, std::iter::once(replacement));
    }

    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(Turn::estimated_tokens).sum()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.turns.iter().filter(|t| t.role == role).count()
    }

    /// assistant 已发出但还没有结果的调用 id
    pub fn pending_call_ids(&self) -> Vec<String> {
        let answered: HashSet<&str> = self
            .turns
            .iter()
            .filter_map(|t| t.tool_call_id.as_deref())
            .collect();
        self.turns
            .iter()
            .flat_map(|t| t.tool_calls.iter())
            .filter(|c| !answered.contains(c.id.as_str()))
            .map(|c| c.id.clone())
            .collect()
    }

    /// 发给模型前的副本：去掉找不到对应调用的 tool turn
    pub fn sanitized(&self) -> Vec<Turn> {
        let mut issued: HashSet<&str> = HashSet::new();
        let mut out = Vec::with_capacity(self.turns.len());
        for turn in &self.turns {
            match turn.role {
                Role::Assistant => {
                    issued.extend(turn.tool_calls.iter().map(|c| c.id.as_str()));
                    out.push(turn.clone());
                }
                Role::Tool => {
                    let known = turn
                        .tool_call_id
                        .as_deref()
                        .map(|id| issued.contains(id))
                        .unwrap_or(false);
                    if known {
                        out.push(turn.clone());
                    } else {
                        tracing::debug!(id = ?turn.tool_call_id, "dropping orphaned tool result");
                    }
                }
                _ => out.push(turn.clone()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_prefix() {
        let mut conv = Conversation::new();
        for i in 0..5 {
            conv.push(Turn::user(format!("m{i}")));
        }
        conv.replace_prefix(3, Turn::system("summary"));
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.turns()[0].role, Role::System);
        assert_eq!(conv.turns()[1].content, "m3");
    }

    #[test]
    fn test_sanitized_drops_orphans() {
        let mut conv = Conversation::new();
        conv.push(Turn::tool_result("ghost", "stale"));
        conv.push(Turn::user("hi"));
        conv.push(Turn::assistant_with_calls("", vec![ToolCall::new("c1", "read_file", "{}")]));
        conv.push(Turn::tool_result("c1", "ok"));
        let sent = conv.sanitized();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].role, Role::User);
        assert_eq!(sent[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_pending_call_ids() {
        let mut conv = Conversation::new();
        conv.push(Turn::assistant_with_calls(
            "",
            vec![ToolCall::new("a", "x", "{}"), ToolCall::new("b", "y", "{}")],
        ));
        conv.push(Turn::tool_result("a", "done"));
        assert_eq!(conv.pending_call_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn test_role_serde() {
        let json = serde_json::to_string(&Turn::tool_result("c", "x")).unwrap();
        assert!(json.contains("\"role\":\"tool\""));
        assert!(json.contains("\"tool_call_id\":\"c\""));
        assert!(!json.contains("tool_calls"));
    }
}
