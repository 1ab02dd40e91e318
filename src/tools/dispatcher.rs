//! 工具分发
//!
//! 一次调用的流程：查找工具 -> 解析并校验参数 -> (变更类) 预览 + 确认门 -> 执行 -> (成功的变更) 快照。
//! 任何失败都变成一条工具结果文本，不会中断编排循环；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;

use crate::core::{AgentEvent, EventSink, LoopState, ResultStatus, ToolError};
use crate::memory::ToolCall;
use crate::snapshot::{SnapshotId, UndoHistory};
use crate::tools::schema::{parse_arguments, validate_arguments};
use crate::tools::{ConfirmationGate, Decision, PendingConfirmation, Preview, ToolRegistry};

/// 工具成功但没有输出时回填的文本
pub const NO_OUTPUT: &str = "Tool executed successfully (no output).";

/// 一次分发的结果
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool: String,
    pub content: String,
    pub status: ResultStatus,
    /// 失败时的错误类别（validation / execution / timeout）
    pub error_kind: Option<&'static str>,
    /// 仅成功的变更类调用会有
    pub snapshot: Option<SnapshotId>,
}

impl ToolOutcome {
    fn new(call: &ToolCall, status: ResultStatus, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            content: content.into(),
            status,
            error_kind: None,
            snapshot: None,
        }
    }

    fn error(call: &ToolCall, err: &ToolError) -> Self {
        Self {
            error_kind: Some(err.kind()),
            ..Self::new(call, ResultStatus::Error, err.to_string())
        }
    }

    /// 中断后未执行的调用
    pub fn skipped(call: &ToolCall) -> Self {
        Self::new(call, ResultStatus::Skipped, "Error: skipped: interrupted by user")
    }
}

/// 分发器：持有注册表与确认门
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    gate: Arc<dyn ConfirmationGate>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<dyn ConfirmationGate>) -> Self {
        Self { registry, gate }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        call: &ToolCall,
        auto_accept: bool,
        sink: &EventSink,
        history: &mut UndoHistory,
    ) -> ToolOutcome {
        let start = Instant::now();
        let mutating = self.registry.is_mutating(&call.name);
        let outcome = self.run(call, mutating, auto_accept, sink, history).await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "call_id": call.id,
            "tool": call.name,
            "mutating": mutating,
            "status": outcome.status,
            "error_kind": outcome.error_kind,
            "snapshot": outcome.snapshot.as_ref().map(|s| s.as_str()),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    async fn run(
        &self,
        call: &ToolCall,
        mutating: bool,
        auto_accept: bool,
        sink: &EventSink,
        history: &mut UndoHistory,
    ) -> ToolOutcome {
        let Some(tool) = self.registry.get(&call.name) else {
            return ToolOutcome::error(call, &ToolError::Validation(format!("unknown tool '{}'", call.name)));
        };
        let args = match parse_arguments(&call.arguments)
            .and_then(|args| validate_arguments(&tool.parameters_schema(), &args).map(|_| args))
        {
            Ok(args) => args,
            Err(e) => return ToolOutcome::error(call, &e),
        };

        let mut target = String::new();
        if mutating {
            target = match tool.target(&args) {
                Ok(t) => t,
                Err(e) => return ToolOutcome::error(call, &e),
            };
            let preview = match tool.preview(&args).await {
                Ok(Some(p)) => p,
                Ok(None) => Preview::text(format!("{} {}", call.name, args)),
                Err(e) => return ToolOutcome::error(call, &e),
            };
            sink.send(AgentEvent::Preview {
                id: call.id.clone(),
                tool: call.name.clone(),
                preview: preview.clone(),
            });

            if !auto_accept {
                sink.set_state(LoopState::AwaitingConfirmation);
                let pending = PendingConfirmation::new(call.clone(), preview);
                let decision = self.gate.confirm(&pending).await;
                sink.set_state(LoopState::ExecutingTools);
                if decision != Decision::Accepted {
                    tracing::info!(tool = %call.name, target = %target, "change declined");
                    return ToolOutcome::new(
                        call,
                        ResultStatus::Declined,
                        format!("{} declined by user. No changes were made.", call.name),
                    );
                }
            }
        }

        let result = AssertUnwindSafe(tool.execute(args)).catch_unwind().await;
        let content = match result {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => return ToolOutcome::error(call, &e),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = %call.name, panic = %msg, "tool panicked");
                let err = ToolError::Execution(format!("tool '{}' crashed: {}", call.name, msg));
                return ToolOutcome::error(call, &err);
            }
        };
        let content = if content.trim().is_empty() {
            NO_OUTPUT.to_string()
        } else {
            content
        };

        let mut outcome = ToolOutcome::new(call, ResultStatus::Success, content);
        if mutating {
            let label = format!("{} {}", call.name, target).trim().to_string();
            let id = history.checkpoint(&label).await;
            if id.is_versioned() {
                sink.send(AgentEvent::SnapshotSaved {
                    id: id.to_string(),
                    label,
                });
            }
            outcome.snapshot = Some(id);
        }
        outcome
    }
}

fn args_preview(raw: &str) -> String {
    if raw.chars().count() > 200 {
        format!("{}...", raw.chars().take(200).collect::<String>())
    } else {
        raw.to_string()
    }
}
