//! Amas - 终端编码助手
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排循环、状态、事件、会话监管、斜杠命令
//! - **llm**: 模型网关抽象与实现（OpenAI 兼容 SSE / Scripted）
//! - **memory**: 会话状态、token 估算、上下文压缩、会话日志
//! - **snapshot**: 快照后端（文件 / git / 无）与撤销重做
//! - **tools**: 工具注册、确认门、分发器与内置工具
//! - **ui**: 行式终端 REPL

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod snapshot;
pub mod tools;
pub mod ui;
