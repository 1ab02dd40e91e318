//! OpenAI 兼容网关
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url；DeepSeek、OpenAI、自建代理等），
//! 流式分片映射为 GatewayEvent。

use std::collections::VecDeque;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, ChatCompletionResponseStream,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::core::GatewayError;
use crate::llm::{DeltaStream, GatewayEvent, ModelGateway, ModelRequest, ResponseAssembler, Usage};
use crate::memory::{Role, Turn};
use crate::tools::ToolSpec;

/// OpenAI 兼容客户端：持有 Client、model 名与单次等待上限
pub struct OpenAiGateway {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiGateway {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self, GatewayError> {
        if api_key.trim().is_empty() {
            return Err(GatewayError::NotConfigured("empty API key".into()));
        }
        let config = match base_url {
            Some(url) => OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Ok(Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    /// 流式请求体：沿用 wire 格式，交给 async_openai 的类型反序列化
    pub fn build_request(&self, request: &ModelRequest<'_>) -> Result<CreateChatCompletionRequest, GatewayError> {
        let mut body = json!({
            "model": self.model,
            "messages": to_wire_messages(request.system, request.turns),
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(to_wire_tools(request.tools));
        }
        serde_json::from_value(body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))
    }
}

fn map_openai_error(e: OpenAIError) -> GatewayError {
    match e {
        OpenAIError::ApiError(api) => GatewayError::Api(api.message),
        OpenAIError::InvalidArgument(message) => GatewayError::InvalidRequest(message),
        OpenAIError::StreamError(inner) => GatewayError::Stream(inner.to_string()),
        OpenAIError::JSONDeserialize(..) => GatewayError::InvalidResponse(e.to_string()),
        other => GatewayError::Network(other.to_string()),
    }
}

/// Turn -> Chat Completions message
pub fn to_wire_messages(system: &str, turns: &[Turn]) -> Vec<Value> {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    if !system.is_empty() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for turn in turns {
        let msg = match turn.role {
            Role::Assistant if turn.has_tool_calls() => {
                let calls: Vec<Value> = turn
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments }
                        })
                    })
                    .collect();
                let content = if turn.content.is_empty() {
                    Value::Null
                } else {
                    Value::String(turn.content.clone())
                };
                json!({ "role": "assistant", "content": content, "tool_calls": calls })
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": turn.tool_call_id.clone().unwrap_or_default(),
                "content": turn.content,
            }),
            role => json!({ "role": role.as_str(), "content": turn.content }),
        };
        messages.push(msg);
    }
    messages
}

pub fn to_wire_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// 单个 chat.completion.chunk 映射出的增量；usage 只在末尾分片出现
pub fn map_stream_chunk(chunk: &CreateChatCompletionStreamResponse) -> (Vec<GatewayEvent>, Option<Usage>) {
    let usage = chunk.usage.as_ref().map(|u| Usage {
        prompt_tokens: u64::from(u.prompt_tokens),
        completion_tokens: u64::from(u.completion_tokens),
    });
    let mut events = Vec::new();
    let Some(choice) = chunk.choices.first() else {
        return (events, usage);
    };

    if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
        events.push(GatewayEvent::TextDelta(text.to_string()));
    }
    for call in choice.delta.tool_calls.iter().flatten() {
        let function = call.function.as_ref();
        events.push(GatewayEvent::ToolCallDelta {
            index: call.index as usize,
            id: call.id.clone(),
            name: function.and_then(|f| f.name.clone()),
            arguments: function
                .and_then(|f| f.arguments.clone())
                .unwrap_or_default(),
        });
    }
    (events, usage)
}

struct ChunkState {
    chunks: ChatCompletionResponseStream,
    timeout: Duration,
    assembler: ResponseAssembler,
    pending: VecDeque<Result<GatewayEvent, GatewayError>>,
    finished: bool,
}

impl ChunkState {
    fn absorb(&mut self, chunk: &CreateChatCompletionStreamResponse) {
        let (events, usage) = map_stream_chunk(chunk);
        if let Some(usage) = usage {
            self.assembler.set_usage(usage);
        }
        for event in events {
            self.assembler.push(&event);
            self.pending.push_back(Ok(event));
        }
    }

    fn finish(&mut self) {
        let assembler = std::mem::take(&mut self.assembler);
        self.pending
            .push_back(Ok(GatewayEvent::Finish(assembler.finish())));
        self.finished = true;
    }

    fn fail(&mut self, error: GatewayError) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }
}

fn delta_stream(chunks: ChatCompletionResponseStream, timeout: Duration) -> DeltaStream {
    let state = ChunkState {
        chunks,
        timeout,
        assembler: ResponseAssembler::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match tokio::time::timeout(st.timeout, st.chunks.next()).await {
                Ok(Some(Ok(chunk))) => st.absorb(&chunk),
                Ok(Some(Err(e))) => st.fail(match map_openai_error(e) {
                    GatewayError::Network(m) => GatewayError::Stream(m),
                    other => other,
                }),
                Ok(None) => st.finish(),
                Err(_) => st.fail(GatewayError::Timeout),
            }
        }
    });
    Box::pin(stream)
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    fn name(&self) -> &str {
        &self.model
    }

    async fn submit(&self, request: ModelRequest<'_>) -> Result<DeltaStream, GatewayError> {
        let body = self.build_request(&request)?;
        tracing::debug!(model = %self.model, turns = request.turns.len(), "submitting model request");
        let chunks = tokio::time::timeout(self.timeout, self.client.chat().create_stream(body))
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(map_openai_error)?;
        Ok(delta_stream(chunks, self.timeout))
    }

    async fn summarize(&self, prompt: &str) -> Result<String, GatewayError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(map_openai_error)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![ChatCompletionRequestMessage::User(message)])
            .build()
            .map_err(map_openai_error)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(map_openai_error)?;
        response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| GatewayError::InvalidResponse("missing choices[0].message.content".into()))
    }
}
