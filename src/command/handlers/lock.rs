//! Session lock handler

use crate::bridge::{BridgeOutcome, Directive};
use crate::command::{CommandHandler, CommandResult, HandlerContext};
use async_trait::async_trait;
use tracing::{info, warn};

pub struct LockHandler;

#[async_trait]
impl CommandHandler for LockHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let system = &ctx.services.system;
        let mut reasons = Vec::new();

        // A service has no desktop to lock; ask the user session to do it
        if !system.has_interactive_session() {
            match ctx.services.bridge.dispatch(&Directive::Lock).await {
                Ok(BridgeOutcome::Triggered) => {
                    info!("[CMD] Lock triggered through the session bridge");
                    return CommandResult::completed("Session lock triggered in the user session.");
                }
                Ok(BridgeOutcome::Deferred) => {
                    reasons.push("session task unavailable".to_string());
                }
                Err(e) => {
                    warn!("[CMD] Session bridge failed: {:#}", e);
                    reasons.push(format!("session bridge: {e:#}"));
                }
            }
        }

        match system.lock_session().await {
            Ok(mechanism) => CommandResult::completed(format!("Session locked ({mechanism}).")),
            Err(e) => {
                reasons.push(format!("{e:#}"));
                CommandResult::failed(format!("Failed to lock session: {}", reasons.join("; ")))
            }
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
    async fn test_interactive_lock_uses_platform_mechanism() {
        let system = Arc::new(FakeSystem::new("linux"));
        let result = run(&LockHandler, system.clone(), CommandParams::new()).await;
        assert_eq!(result, CommandResult::completed("Session locked (loginctl)."));
        assert_eq!(system.calls(), vec!["lock".to_string()]);
    }

    #[tokio::test]
    async fn test_service_lock_goes_through_session_task() {
        let system = Arc::new(FakeSystem::with_state("windows", |s| s.interactive = false));
        let result = run(&LockHandler, system.clone(), CommandParams::new()).await;
        assert!(result.is_success());
        assert!(system.calls().iter().any(|c| c.contains("schtasks /run")));
        assert!(!system.calls().contains(&"lock".to_string()));
    }

    #[tokio::test]
    async fn test_all_mechanisms_failing_aggregates_reasons() {
        let system = Arc::new(FakeSystem::with_state("linux", |s| {
            s.interactive = false;
            s.lock_fails = true;
        }));
        let result = run(&LockHandler, system, CommandParams::new()).await;
        let CommandResult::Failed { message } = result else {
            panic!("expected failure");
        };
        assert!(message.contains("session task unavailable"));
        assert!(message.contains("xdg-screensaver"));
    }
}
