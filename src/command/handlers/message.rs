//! Interactive alert handler

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use async_trait::async_trait;

const DEFAULT_MESSAGE: &str = "Alert from Admin";

pub struct MessageHandler;

#[async_trait]
impl CommandHandler for MessageHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let text = ctx
            .params()
            .first_str(&["message", "text"])
            .unwrap_or(DEFAULT_MESSAGE);
        // Escaping is the platform's job; the text goes through as-is
        match ctx.services.system.show_alert(text).await {
            Ok(()) => CommandResult::completed("Message displayed."),
            Err(e) => CommandResult::failed(format!("Failed to display message: {e:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::run;
    use crate::platform::fake::FakeSystem;
    use lab_agent_shared::CommandParams;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_blank_message_uses_default() {
        let system = Arc::new(FakeSystem::new("linux"));
        run(&MessageHandler, system.clone(), CommandParams::new().with("message", "  ")).await;
        assert_eq!(system.calls(), vec![format!("alert {DEFAULT_MESSAGE}")]);
    }

    #[tokio::test]
    async fn test_alert_failure_is_reported() {
        let system = Arc::new(FakeSystem::with_state("linux", |s| s.alert_fails = true));
        let result = run(&MessageHandler, system, CommandParams::new().with("text", "hi")).await;
        assert_eq!(result, CommandResult::failed("Failed to display message: no display"));
    }
}
