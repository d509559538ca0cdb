//! Command dispatcher - polls pending commands and runs them in order

use super::registry::{CommandResult, HandlerContext, HandlerRegistry, HandlerServices};
use crate::error::RpcError;
use crate::registration::Session;
use futures::FutureExt;
use lab_agent_shared::{Command, CommandLifecycle, CommandStatus, LifecycleEvent};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What one poll did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub executed: usize,
    /// A handler asked the agent to stop (installer hand-off, applied update)
    pub exit_requested: bool,
}

/// Executes commands received from the server
pub struct CommandDispatcher {
    registry: HandlerRegistry,
    services: Arc<HandlerServices>,
}

impl CommandDispatcher {
    pub fn new(registry: HandlerRegistry, services: Arc<HandlerServices>) -> Self {
        Self { registry, services }
    }

    /// Fetch this machine's pending commands and run them sequentially
    ///
    /// A failing command never stops the batch; only an exit request does.
    pub async fn poll(&self, session: &mut Session) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let (Some(token), Some(server_id)) = (session.token.clone(), session.server_id) else {
            return outcome;
        };

        let commands = match self.services.rpc.pending_commands(&token, server_id).await {
            Ok(commands) => commands,
            Err(RpcError::AuthExpired) => {
                warn!("[CMD] Token rejected while polling, re-authenticating next cycle");
                session.expire();
                return outcome;
            }
            Err(e) => {
                warn!("[CMD] Could not fetch pending commands: {}", e);
                return outcome;
            }
        };
        if !commands.is_empty() {
            debug!("[CMD] {} pending command(s)", commands.len());
        }

        for command in &commands {
            let result = self.execute(&token, server_id, command).await;
            outcome.executed += 1;
            if result.requests_exit() {
                info!("[CMD] Command {} requested agent exit", command.id);
                outcome.exit_requested = true;
                break;
            }
        }
        outcome
    }

    /// Run one command through its lifecycle and report every transition
    pub async fn execute(&self, token: &str, server_id: u64, command: &Command) -> CommandResult {
        info!("[CMD] Executing command: id={} kind={}", command.id, command.kind);

        // The server listed it as pending, whatever the status field says
        let mut lifecycle = CommandLifecycle::new(command.id, CommandStatus::Pending);
        match lifecycle.process_event(LifecycleEvent::Dispatched) {
            Ok(status) => self.report(token, command.id, status, None).await,
            Err(e) => warn!("[CMD] {}", e),
        }

        let result = match self.registry.get(&command.kind) {
            Some(handler) => {
                let ctx = HandlerContext {
                    command,
                    token,
                    server_id,
                    services: &self.services,
                };
                AssertUnwindSafe(handler.handle(&ctx))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        error!("[CMD] Handler for {} panicked", command.kind);
                        CommandResult::failed(format!("Handler for {} crashed", command.kind))
                    })
            }
            None => CommandResult::failed(format!("Unknown command: {}", command.kind)),
        };

        let event = match &result {
            CommandResult::Completed { .. } | CommandResult::Restart { .. } => {
                LifecycleEvent::Succeeded
            }
            CommandResult::Failed { .. } => LifecycleEvent::Failed,
            // The external installer owns completion
            CommandResult::HandedOff { .. } => LifecycleEvent::Progress,
        };
        match lifecycle.process_event(event) {
            Ok(status) => {
                if result.is_success() {
                    info!("[CMD] Command {} {}", command.id, status);
                } else {
                    warn!("[CMD] Command {} failed: {}", command.id, result.message());
                }
                self.report(token, command.id, status, Some(result.message())).await;
            }
            Err(e) => warn!("[CMD] {}", e),
        }
        result
    }

    /// Fire-and-forget status report
    async fn report(&self, token: &str, command_id: u64, status: CommandStatus, output: Option<&str>) {
        if let Err(e) = self
            .services
            .rpc
            .update_command_status(token, command_id, status, output)
            .await
        {
            warn!("[CMD] Status report {} for {} failed: {}", status, command_id, e);
        }
    }
}
