//! Task execution and the result handed back to the planner.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ExecutionMode;
use crate::orchestrator::CommandOrchestrator;

/// Action tag whose instructions carry shell commands.
pub const SHELL_ACTION: &str = "Shell";

/// Asks a human to carry out work the tool will not run itself.
pub trait OperatorPrompt {
    /// Show `instruction` and return the result text the operator reports.
    fn manual_result(&self, action: &str, instruction: &str) -> Result<String>;
}

/// What was asked and what actually ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteContext {
    pub action: String,
    pub instruction: String,
    /// Literal commands sent to the shell, in order.
    pub code: Vec<String>,
}

/// The outbound record for the planning side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub context: ExecuteContext,
    pub response: String,
}

#[derive(Debug, Clone)]
pub struct ExecuteTask {
    pub action: String,
    pub instruction: String,
}

impl ExecuteTask {
    pub fn new(action: &str, instruction: &str) -> Self {
        Self {
            action: action.to_string(),
            instruction: instruction.to_string(),
        }
    }

    fn runs_automatically(&self, mode: ExecutionMode) -> bool {
        match mode {
            ExecutionMode::Auto => true,
            ExecutionMode::Manual => false,
            ExecutionMode::Semi => self.action == SHELL_ACTION,
        }
    }

    pub fn run(
        &self,
        mode: ExecutionMode,
        orchestrator: &CommandOrchestrator<'_>,
        operator: &dyn OperatorPrompt,
    ) -> Result<ExecuteResult> {
        let (code, response) = if self.runs_automatically(mode) {
            let execution = orchestrator.run(&self.action, &self.instruction);
            (execution.commands, execution.transcript)
        } else {
            info!(action = %self.action, ?mode, "handing task to the operator");
            (
                Vec::new(),
                operator.manual_result(&self.action, &self.instruction)?,
            )
        };

        Ok(ExecuteResult {
            context: ExecuteContext {
                action: self.action.clone(),
                instruction: self.instruction.clone(),
                code,
            },
            response,
        })
    }
}
