//! 错误类型
//!
//! ToolError 最终都会变成一条工具结果回填给模型；GatewayError 决定是否重试；
//! SnapshotError 只在显式的撤销/恢复命令中向用户报告，保存失败降级为哨兵 id。

use thiserror::Error;

/// 编排层错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(String),
}

/// 工具调用失败；Display 即回填给模型的结果文本
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// 未知工具、参数不是 JSON 对象、不符合 schema
    #[error("Error: {0}")]
    Validation(String),

    /// 工具体返回失败（含 panic 被捕获）
    #[error("Error: {0}")]
    Execution(String),

    #[error("Error: command timed out after {0}s")]
    Timeout(u64),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Validation(_) => "validation",
            ToolError::Execution(_) => "execution",
            ToolError::Timeout(_) => "timeout",
        }
    }
}

/// 模型网关错误
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// 服务端返回的结构化错误（OpenAI error 对象）
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Gateway not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    /// 是否为瞬时故障（限流、5xx、断连、超时），可重试一次
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http { status, body } => {
                crate::llm::retry::is_retryable_http_error(*status, body)
            }
            GatewayError::Api(msg) | GatewayError::Network(msg) | GatewayError::Stream(msg) => {
                crate::llm::retry::is_retryable_message(msg)
            }
            GatewayError::Timeout => true,
            GatewayError::InvalidResponse(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::NotConfigured(_) => false,
        }
    }
}

/// 快照后端错误
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot store is not versioned")]
    Unversioned,

    #[error("Nothing to undo: only {available} earlier snapshot(s)")]
    NothingToUndo { available: usize },

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("No snapshot found matching '{0}'")]
    NotFound(String),

    #[error("Snapshot id '{0}' is ambiguous")]
    Ambiguous(String),

    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot data corrupted: {0}")]
    Corrupted(String),

    #[error("git failed: {0}")]
    Git(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_display() {
        assert_eq!(
            ToolError::Validation("unknown tool 'nope'".into()).to_string(),
            "Error: unknown tool 'nope'"
        );
        assert_eq!(
            ToolError::Timeout(2).to_string(),
            "Error: command timed out after 2s"
        );
    }

    #[test]
    fn test_gateway_transient() {
        assert!(GatewayError::Http { status: 429, body: String::new() }.is_transient());
        assert!(GatewayError::Http { status: 503, body: String::new() }.is_transient());
        assert!(!GatewayError::Http { status: 401, body: "bad key".into() }.is_transient());
        assert!(GatewayError::Http { status: 400, body: "model overloaded".into() }.is_transient());
        assert!(GatewayError::Timeout.is_transient());
        assert!(!GatewayError::InvalidResponse("x".into()).is_transient());
        assert!(GatewayError::Api("The server is overloaded".into()).is_transient());
        assert!(!GatewayError::Api("Incorrect API key provided".into()).is_transient());
        assert!(GatewayError::Stream("Invalid status code: 502 Bad Gateway".into()).is_transient());
        assert!(!GatewayError::InvalidRequest("stream must be true".into()).is_transient());
    }
}
