//! Shutdown and restart handlers

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use crate::platform::PowerAction;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Delay given to the OS before it powers off
const POWER_DELAY: Duration = Duration::from_secs(5);

pub struct PowerHandler {
    action: PowerAction,
}

impl PowerHandler {
    pub fn shutdown() -> Self {
        Self {
            action: PowerAction::Shutdown,
        }
    }

    pub fn restart() -> Self {
        Self {
            action: PowerAction::Restart,
        }
    }
}

/// Success means the directive was issued, not that the machine went down
#[async_trait]
impl CommandHandler for PowerHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        info!("[CMD] {:?} in {}s", self.action, POWER_DELAY.as_secs());
        match ctx.services.system.power(self.action, POWER_DELAY).await {
            Ok(()) => CommandResult::completed(match self.action {
                PowerAction::Shutdown => "Shutdown command issued.",
                PowerAction::Restart => "Restart command issued.",
            }),
            Err(e) => CommandResult::failed(format!("{:?} failed: {e:#}", self.action)),
        }
    }
}
