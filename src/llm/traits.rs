//! 模型网关抽象
//!
//! 所有后端（OpenAI 兼容 / Scripted）实现 ModelGateway：submit 返回归一化的增量流，
//! summarize 为压缩器提供非流式补全。

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;

use crate::core::GatewayError;
use crate::memory::{ToolCall, Turn};
use crate::tools::ToolSpec;

/// 一次模型请求：系统提示词 + 会话 + 可用工具
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolSpec],
}

/// Token 用量（后端提供时）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// 一轮完整的模型输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

/// 归一化的流式增量
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    TextDelta(String),
    /// 按 index 聚合；id/name 只在首个分片出现，arguments 逐段拼接
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
    Finish(ModelResponse),
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<GatewayEvent, GatewayError>> + Send>>;

/// 模型网关 trait
#[async_trait]
pub trait ModelGateway: Send + Sync {
    fn name(&self) -> &str;

    /// 流式提交，返回增量流
    async fn submit(&self, request: ModelRequest<'_>) -> Result<DeltaStream, GatewayError>;

    /// 非流式补全（用于会话摘要）
    async fn summarize(&self, prompt: &str) -> Result<String, GatewayError>;
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// 把增量流折叠成 ModelResponse（流在 Finish 之前结束时使用）
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    text: String,
    calls: BTreeMap<usize, PartialCall>,
    usage: Option<Usage>,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::TextDelta(t) => self.text.push_str(t),
            GatewayEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let entry = self.calls.entry(*index).or_default();
                if let Some(id) = id {
                    if !id.is_empty() {
                        entry.id = id.clone();
                    }
                }
                if let Some(name) = name {
                    entry.name.push_str(name);
                }
                entry.arguments.push_str(arguments);
            }
            GatewayEvent::Finish(resp) => {
                if resp.usage.is_some() {
                    self.usage = resp.usage;
                }
            }
        }
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.usage = Some(usage);
    }

    pub fn has_content(&self) -> bool {
        !self.text.is_empty() || !self.calls.is_empty()
    }

    /// 按 index 顺序输出调用；缺 id 的补一个，空参数补 "{}"
    pub fn finish(self) -> ModelResponse {
        let tool_calls = self
            .calls
            .into_values()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCall {
                id: if c.id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    c.id
                },
                name: c.name,
                arguments: if c.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    c.arguments
                },
            })
            .collect();
        ModelResponse {
            text: self.text,
            tool_calls,
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_merges_fragments() {
        let mut asm = ResponseAssembler::new();
        asm.push(&GatewayEvent::TextDelta("Let me ".into()));
        asm.push(&GatewayEvent::TextDelta("look.".into()));
        asm.push(&GatewayEvent::ToolCallDelta {
            index: 1,
            id: Some("b".into()),
            name: Some("list_files".into()),
            arguments: String::new(),
        });
        asm.push(&GatewayEvent::ToolCallDelta {
            index: 0,
            id: Some("a".into()),
            name: Some("read_file".into()),
            arguments: "{\"path\":".into(),
        });
        asm.push(&GatewayEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments: "\"x.rs\"}".into(),
        });
        let resp = asm.finish();
        assert_eq!(resp.text, "Let me look.");
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].id, "a");
        assert_eq!(resp.tool_calls[0].arguments, "{\"path\":\"x.rs\"}");
        assert_eq!(resp.tool_calls[1].arguments, "{}");
    }

    #[test]
    fn test_assembler_fills_missing_id() {
        let mut asm = ResponseAssembler::new();
        asm.push(&GatewayEvent::ToolCallDelta {
            index: 0,
            id: None,
            name: Some("read_file".into()),
            arguments: "{}".into(),
        });
        let resp = asm.finish();
        assert!(resp.tool_calls[0].id.starts_with("call_"));
    }
}
