//! Handler registry - maps a command kind to the handler that runs it

use super::handlers;
use crate::acquire::FileAcquirer;
use crate::bridge::SessionBridge;
use crate::config::AgentConfig;
use crate::platform::SystemActions;
use crate::reports::Reporter;
use crate::rpc::InventoryRpc;
use crate::update::UpdatePipeline;
use async_trait::async_trait;
use lab_agent_shared::{Command, CommandParams, CommandStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Result of command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Command ran; the output is reported with `completed`
    Completed { message: String },
    /// Command could not run or its action failed
    Failed { message: String },
    /// An external process took over; reported as `processing`, then the agent exits
    HandedOff { message: String },
    /// Completed, and the agent must exit so its replacement starts
    Restart { message: String },
}

impl CommandResult {
    pub fn completed(message: impl Into<String>) -> Self {
        CommandResult::Completed {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        CommandResult::Failed {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CommandResult::Completed { message }
            | CommandResult::Failed { message }
            | CommandResult::HandedOff { message }
            | CommandResult::Restart { message } => message,
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, CommandResult::Failed { .. })
    }

    /// Whether the agent should stop after reporting this result
    pub fn requests_exit(&self) -> bool {
        matches!(
            self,
            CommandResult::HandedOff { .. } | CommandResult::Restart { .. }
        )
    }
}

/// Collaborators handlers may use
pub struct HandlerServices {
    pub rpc: Arc<dyn InventoryRpc>,
    pub system: Arc<dyn SystemActions>,
    pub config: Arc<AgentConfig>,
    pub acquirer: Arc<FileAcquirer>,
    pub bridge: Arc<SessionBridge>,
    pub pipeline: Arc<UpdatePipeline>,
    pub reporter: Arc<Reporter>,
}

/// Context passed to command handlers
pub struct HandlerContext<'a> {
    pub command: &'a Command,
    pub token: &'a str,
    pub server_id: u64,
    pub services: &'a HandlerServices,
}

impl HandlerContext<'_> {
    pub fn params(&self) -> &CommandParams {
        &self.command.parameters
    }

    /// First present string among `keys`, or a `Failed` naming the first key
    pub fn require(&self, keys: &[&str]) -> Result<&str, CommandResult> {
        self.params().first_str(keys).ok_or_else(|| {
            CommandResult::failed(format!(
                "Missing required parameter: {}",
                keys.first().copied().unwrap_or("?")
            ))
        })
    }

    /// Report an intermediate `processing` message; failures are logged only
    pub async fn progress(&self, message: &str) {
        if let Err(e) = self
            .services
            .rpc
            .update_command_status(
                self.token,
                self.command.id,
                CommandStatus::Processing,
                Some(message),
            )
            .await
        {
            warn!("[CMD] Progress report for {} failed: {}", self.command.id, e);
        }
    }
}

/// Logic for one command kind
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in command kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("shutdown", handlers::PowerHandler::shutdown());
        registry.register("restart", handlers::PowerHandler::restart());
        registry.register("lock", handlers::LockHandler);
        registry.register("message", handlers::MessageHandler);
        registry.register("wol", handlers::WolHandler::default());
        registry.register("ps_list", handlers::ProcessListHandler);
        registry.register("ps_kill", handlers::ProcessKillHandler);
        registry.register("terminal", handlers::ShellHandler);
        registry.register("receive_file", handlers::ReceiveFileHandler);
        registry.register("install_software", handlers::InstallHandler);
        registry.register("set_hostname", handlers::HostnameHandler);
        registry.register("update_agent", handlers::UpdateHandler);
        registry
    }

    pub fn register(&mut self, kind: &'static str, handler: impl CommandHandler + 'static) {
        self.handlers.insert(kind, Arc::new(handler));
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_kinds() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(
            registry.kinds(),
            vec![
                "install_software",
                "lock",
                "message",
                "ps_kill",
                "ps_list",
                "receive_file",
                "restart",
                "set_hostname",
                "shutdown",
                "terminal",
                "update_agent",
                "wol",
            ]
        );
        assert!(registry.get("screenshot").is_none());
    }

    #[test]
    fn test_result_exit_semantics() {
        assert!(CommandResult::Restart { message: "x".into() }.requests_exit());
        assert!(CommandResult::Restart { message: "x".into() }.is_success());
        assert!(!CommandResult::failed("x").is_success());
        assert!(!CommandResult::completed("x").requests_exit());
    }
}
