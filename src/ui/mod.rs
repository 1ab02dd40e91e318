//! 终端前端：行式 REPL、事件渲染、终端确认门

pub mod render;
pub mod repl;

pub use repl::{run, shared_stdin, SharedInput, TerminalGate};
