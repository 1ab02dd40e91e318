//! 编排过程事件：用于终端渲染与测试断言（思考流、工具调用、预览、结果、快照、提醒）

use serde::Serialize;

use crate::core::LoopState;
use crate::tools::Preview;

/// 工具结果的归类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
    Declined,
    Skipped,
}

/// 单步过程事件（可序列化为 JSON）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged { state: LoopState },
    /// 模型输出的一小段（流式）
    TextDelta { text: String },
    /// 上一次尝试的流式文本作废（瞬时错误后重试）
    StreamReset,
    /// 本轮最终回复
    AssistantMessage { text: String },
    ToolCall {
        id: String,
        tool: String,
        arguments: String,
    },
    /// 变更预览（自动接受时同样发出）
    Preview {
        id: String,
        tool: String,
        preview: Preview,
    },
    /// 工具结果；在结果已回填并提交给模型之后才发出
    ToolResult {
        id: String,
        tool: String,
        status: ResultStatus,
        content: String,
    },
    SnapshotSaved { id: String, label: String },
    Compacted {
        replaced_turns: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
    Warning { text: String },
    Interrupted,
    Error { text: String },
}
