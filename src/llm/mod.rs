//! 模型网关层：流式抽象与实现（OpenAI 兼容 / Scripted）

pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::{ScriptedGateway, ScriptedReply};
pub use openai::OpenAiGateway;
pub use traits::{
    DeltaStream, GatewayEvent, ModelGateway, ModelRequest, ModelResponse, ResponseAssembler, Usage,
};

/// 根据配置选择网关：openai 且有 API Key 时走 OpenAI 兼容端点，否则回退 Scripted（回显）
pub fn create_gateway_from_config(cfg: &AppConfig) -> Arc<dyn ModelGateway> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using scripted gateway (provider = mock)");
        return Arc::new(ScriptedGateway::new());
    }
    match cfg.api_key() {
        Some(key) => match OpenAiGateway::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            &key,
            cfg.llm.request_timeout_secs,
        ) {
            Ok(gw) => {
                tracing::info!("Using OpenAI-compatible gateway ({})", cfg.llm.model);
                Arc::new(gw)
            }
            Err(e) => {
                tracing::warn!("Gateway init failed ({}), using scripted gateway", e);
                Arc::new(ScriptedGateway::new())
            }
        },
        None => {
            tracing::warn!("No API key set, using scripted gateway");
            Arc::new(ScriptedGateway::new())
        }
    }
}
