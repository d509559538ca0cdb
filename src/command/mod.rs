//! Remote command execution for the endpoint
//!
//! This module handles:
//! - Polling the server for pending commands
//! - Dispatching each one to the handler registered for its kind
//! - Reporting every status transition back to the server

mod dispatcher;
pub mod handlers;
mod registry;

pub use dispatcher::CommandDispatcher;
pub use registry::{CommandHandler, CommandResult, HandlerContext, HandlerRegistry, HandlerServices};

#[cfg(test)]
pub(crate) fn test_services(
    rpc: std::sync::Arc<crate::rpc::fake::FakeRpc>,
    system: std::sync::Arc<crate::platform::fake::FakeSystem>,
    root: &std::path::Path,
    deployment: crate::config::Deployment,
) -> HandlerServices {
    use crate::acquire::FileAcquirer;
    use crate::bridge::SessionBridge;
    use crate::config::AgentConfig;
    use crate::reports::Reporter;
    use crate::update::UpdatePipeline;
    use std::sync::Arc;

    let config = Arc::new(AgentConfig {
        agent_dir: root.join("agent"),
        bridge_dir: root.join("staging"),
        deployment,
        ..Default::default()
    });
    let acquirer = Arc::new(FileAcquirer::new(rpc.clone(), system.clone()));
    let bridge = Arc::new(
        SessionBridge::new(system.clone(), config.bridge_dir.clone()).with_logon_dir(root.join("logon")),
    );
    let pipeline = Arc::new(
        UpdatePipeline::new(rpc.clone(), system.clone(), acquirer.clone(), config.clone())
            .with_allow_list(&["lab-agent", "VERSION"])
            .with_installer_dir(root.join("installer")),
    );
    let reporter = Arc::new(Reporter::new(
        rpc.clone(),
        system.clone(),
        acquirer.clone(),
        bridge.clone(),
        config.clone(),
    ));
    HandlerServices {
        rpc,
        system,
        config,
        acquirer,
        bridge,
        pipeline,
        reporter,
    }
}
