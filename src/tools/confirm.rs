//! 确认门：变更类工具应用前的挂起点
//!
//! 分发是串行的，同一时刻最多一个待确认项；终端实现见 ui::repl::TerminalGate。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;

use crate::memory::ToolCall;
use crate::tools::Preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pending,
    Accepted,
    Declined,
}

/// 一次待确认的变更（仅在一个分发周期内存在）
#[derive(Debug, Clone, Serialize)]
pub struct PendingConfirmation {
    pub tool_call: ToolCall,
    pub preview: Preview,
    pub decision: Decision,
}

impl PendingConfirmation {
    pub fn new(tool_call: ToolCall, preview: Preview) -> Self {
        Self {
            tool_call,
            preview,
            decision: Decision::Pending,
        }
    }
}

/// 确认门 trait：渲染预览并给出 Accepted / Declined
///
/// ask 供 ask_user 工具向用户提问；None 表示前端无法提问（非交互）。
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, pending: &PendingConfirmation) -> Decision;

    async fn ask(&self, _question: &str) -> Option<String> {
        None
    }
}

/// 全部接受
#[derive(Debug, Default)]
pub struct AutoAcceptGate;

#[async_trait]
impl ConfirmationGate for AutoAcceptGate {
    async fn confirm(&self, _pending: &PendingConfirmation) -> Decision {
        Decision::Accepted
    }
}

/// 预置决定队列；耗尽后一律拒绝。记录每次看到的预览
#[derive(Debug, Default)]
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<Decision>>,
    seen: Mutex<Vec<PendingConfirmation>>,
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedGate {
    pub fn new(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into_iter().collect()),
            ..Self::default()
        }
    }

    /// ask_user 的预置回答
    pub fn with_answers(self, answers: impl IntoIterator<Item = String>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            ..self
        }
    }

    pub fn accept_all(n: usize) -> Self {
        Self::new(std::iter::repeat(Decision::Accepted).take(n))
    }

    pub fn seen(&self) -> Vec<PendingConfirmation> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ConfirmationGate for ScriptedGate {
    async fn confirm(&self, pending: &PendingConfirmation) -> Decision {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(pending.clone());
        }
        self.decisions
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(Decision::Declined)
    }

    async fn ask(&self, _question: &str) -> Option<String> {
        self.answers.lock().ok().and_then(|mut q| q.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_gate_exhausts_to_decline() {
        let gate = ScriptedGate::new([Decision::Accepted]);
        let pending = PendingConfirmation::new(
            ToolCall::new("c1", "write_file", "{}"),
            Preview::text("write"),
        );
        assert_eq!(gate.confirm(&pending).await, Decision::Accepted);
        assert_eq!(gate.confirm(&pending).await, Decision::Declined);
        assert_eq!(gate.seen().len(), 2);
    }
}
