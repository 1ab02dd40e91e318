//! 核心编排层：错误、状态、事件、会话监管、命令、主控循环

pub mod builder;
pub mod commands;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod references;
pub mod session;
pub mod session_supervisor;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use commands::SlashCommand;
pub use error::{AgentError, GatewayError, SnapshotError, ToolError};
pub use events::{AgentEvent, ResultStatus};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use session::SessionContext;
pub use session_supervisor::SessionSupervisor;
pub use state::{EventSink, LoopState};
