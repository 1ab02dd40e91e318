//! ask_user：模型需要澄清时向用户提问，回答作为工具结果回填

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::core::ToolError;
use crate::tools::{ConfirmationGate, Tool};

const NO_RESPONSE: &str = "No response provided by user.";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskUserArgs {
    /// The question to ask the user
    pub question: String,
}

pub struct AskUserTool {
    gate: Arc<dyn ConfirmationGate>,
}

impl AskUserTool {
    pub fn new(gate: Arc<dyn ConfirmationGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    type Args = AskUserArgs;

    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a question when you need more information or clarification."
    }

    async fn execute(&self, args: AskUserArgs) -> Result<String, ToolError> {
        let question = args.question.trim();
        if question.is_empty() {
            return Err(ToolError::Validation("question must not be empty".into()));
        }
        match self.gate.ask(question).await {
            Some(answer) if !answer.trim().is_empty() => Ok(answer.trim().to_string()),
            Some(_) => Ok(NO_RESPONSE.to_string()),
            None => Err(ToolError::Execution(
                "cannot ask the user in this session; proceed with your best judgement".into(),
            )),
        }
    }
}
