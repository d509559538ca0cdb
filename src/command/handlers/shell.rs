//! Ad-hoc shell execution handler

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use crate::platform::RunError;
use async_trait::async_trait;
use lab_agent_shared::limits;
use std::time::Duration;

const NO_OUTPUT: &str = "[Command executed successfully with no output]";

/// Runs a command line; success means it ran, whatever its exit code
pub struct ShellHandler;

#[async_trait]
impl CommandHandler for ShellHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let command_line = match ctx.require(&["command", "cmd_line"]) {
            Ok(c) => c,
            Err(missing) => return missing,
        };

        let limit = Duration::from_millis(limits::SHELL_TIMEOUT_MS);
        match ctx.services.system.run_shell(command_line, limit).await {
            Ok(out) => {
                let combined = out.combined();
                if combined.trim().is_empty() && out.success() {
                    CommandResult::completed(NO_OUTPUT)
                } else {
                    CommandResult::completed(combined)
                }
            }
            Err(RunError::TimedOut(limit)) => {
                CommandResult::failed(format!("Command timed out after {} seconds.", limit.as_secs()))
            }
            Err(e) => CommandResult::failed(format!("Failed to execute command: {e}")),
        }
    }
}
