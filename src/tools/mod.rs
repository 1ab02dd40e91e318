pub mod ask;
pub mod confirm;
pub mod dispatcher;
pub mod filesystem;
pub mod preview;
pub mod registry;
pub mod schema;
pub mod search;
pub mod shell;
pub mod web;

pub use ask::AskUserTool;
pub use confirm::{AutoAcceptGate, ConfirmationGate, Decision, PendingConfirmation, ScriptedGate};
pub use dispatcher::{ToolDispatcher, ToolOutcome, NO_OUTPUT};
pub use filesystem::{
    CreateFileTool, DeleteFileTool, EditFileTool, IgnoreRules, ListFilesTool, ReadFileTool,
    ReplaceLinesTool, SafeFs, WriteFileTool,
};
pub use preview::Preview;
pub use registry::{DynTool, Tool, ToolRegistry, ToolSpec};
pub use search::SearchFilesTool;
pub use shell::ShellTool;
pub use web::FetchUrlTool;
