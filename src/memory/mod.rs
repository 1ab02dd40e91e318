//! 记忆层：会话状态、token 估算、上下文压缩、会话日志

pub mod compactor;
pub mod conversation;
pub mod persistence;
pub mod token_budget;

pub use compactor::{find_boundary, CompactionReport, Compactor, SUMMARY_PREFIX};
pub use conversation::{Conversation, Role, ToolCall, Turn};
pub use persistence::{HistoryEntry, HistoryLog};
pub use token_budget::{ContextBudget, TokenEstimator};
