//! Scripted 网关（用于测试与无 API Key 的本地运行）
//!
//! 按顺序弹出预置回复；队列为空时回显最后一条 User 消息。每次请求的会话快照都会被记录，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::core::GatewayError;
use crate::llm::{DeltaStream, GatewayEvent, ModelGateway, ModelRequest, ModelResponse};
use crate::memory::{Role, ToolCall, Turn};

/// 一次预置回复
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// 以增量形式回放，最后补 Finish
    Events(Vec<GatewayEvent>),
    /// 流中途失败：先回放增量，再返回错误
    FailMidStream(Vec<GatewayEvent>, GatewayError),
    /// submit 直接失败
    Fail(GatewayError),
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        ScriptedReply::Events(vec![GatewayEvent::TextDelta(text.clone()), finish(&text, vec![])])
    }

    /// 一轮纯工具调用：(id, name, arguments JSON)
    pub fn tool_calls(calls: Vec<(&str, &str, serde_json::Value)>) -> Self {
        let calls: Vec<ToolCall> = calls
            .into_iter()
            .map(|(id, name, args)| ToolCall::new(id, name, args.to_string()))
            .collect();
        let mut events: Vec<GatewayEvent> = calls
            .iter()
            .enumerate()
            .map(|(index, c)| GatewayEvent::ToolCallDelta {
                index,
                id: Some(c.id.clone()),
                name: Some(c.name.clone()),
                arguments: c.arguments.clone(),
            })
            .collect();
        events.push(finish("", calls));
        ScriptedReply::Events(events)
    }

    /// 原始参数文本（用于构造非法 JSON）
    pub fn raw_tool_call(id: &str, name: &str, arguments: &str) -> Self {
        let call = ToolCall::new(id, name, arguments);
        ScriptedReply::Events(vec![finish("", vec![call])])
    }

    pub fn fail(error: GatewayError) -> Self {
        ScriptedReply::Fail(error)
    }
}

fn finish(text: &str, tool_calls: Vec<ToolCall>) -> GatewayEvent {
    GatewayEvent::Finish(ModelResponse {
        text: text.to_string(),
        tool_calls,
        usage: None,
    })
}

/// Scripted 网关
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<ScriptedReply>>,
    summaries: Mutex<VecDeque<Result<String, GatewayError>>>,
    requests: Mutex<Vec<Vec<Turn>>>,
    delay: Option<Duration>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn with_summaries(
        self,
        summaries: impl IntoIterator<Item = Result<String, GatewayError>>,
    ) -> Self {
        Self {
            summaries: Mutex::new(summaries.into_iter().collect()),
            ..self
        }
    }

    /// submit 前等待（用于中断测试）
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// 每次 submit 收到的会话（按请求顺序）
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn next_reply(&self, turns: &[Turn]) -> ScriptedReply {
        let scripted = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        scripted.unwrap_or_else(|| {
            let last_user = turns
                .iter()
                .rev()
                .find(|t| t.role == Role::User)
                .map(|t| t.content.as_str())
                .unwrap_or("(no input)");
            ScriptedReply::text(format!("Echo: {last_user}"))
        })
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn submit(&self, request: ModelRequest<'_>) -> Result<DeltaStream, GatewayError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.turns.to_vec());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply(request.turns) {
            ScriptedReply::Events(events) => {
                Ok(Box::pin(stream::iter(
                    events.into_iter().map(Ok::<GatewayEvent, GatewayError>),
                )))
            }
            ScriptedReply::FailMidStream(events, err) => {
                let items: Vec<Result<GatewayEvent, GatewayError>> =
                    events.into_iter().map(Ok).chain(std::iter::once(Err(err))).collect();
                Ok(Box::pin(stream::iter(items)))
            }
            ScriptedReply::Fail(err) => Err(err),
        }
    }

    async fn summarize(&self, _prompt: &str) -> Result<String, GatewayError> {
        self.summaries
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| Ok("The user and assistant worked on the project.".to_string()))
    }
}
