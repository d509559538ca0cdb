//! Self-update trigger handler

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use crate::update::UpdateOutcome;
use async_trait::async_trait;

pub struct UpdateHandler;

#[async_trait]
impl CommandHandler for UpdateHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        match ctx.services.pipeline.run(ctx.token).await {
            Ok(UpdateOutcome::UpToDate { current }) => {
                CommandResult::completed(format!("Agent is up to date (version {current})."))
            }
            Ok(UpdateOutcome::Applied { from, to }) => CommandResult::Restart {
                message: format!("Agent updated from {from} to {to}. Restarting."),
            },
            Ok(UpdateOutcome::HandedOff { to, .. }) => CommandResult::HandedOff {
                message: format!("Downloading and running installer for version {to}..."),
            },
            Err(e) => CommandResult::failed(format!("Update failed: {e}")),
        }
    }
}
