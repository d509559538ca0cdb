//! Host rename handler

use crate::command::{CommandHandler, CommandResult, HandlerContext};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

const MAX_HOSTNAME_LEN: usize = 63;

/// Alphanumerics, `.` and `-`, starting and ending with an alphanumeric
pub fn validate_hostname(name: &str) -> Result<(), String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    if name.is_empty() {
        return Err("Hostname cannot be empty".into());
    }
    if name.len() > MAX_HOSTNAME_LEN {
        return Err(format!(
            "Hostname too long ({} characters, max {MAX_HOSTNAME_LEN})",
            name.len()
        ));
    }
    let grammar = RE
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9.-]*[a-zA-Z0-9])?$").ok())
        .as_ref()
        .ok_or_else(|| "Hostname grammar unavailable".to_string())?;
    if !grammar.is_match(name) {
        return Err(format!(
            "Invalid hostname {name:?}: use letters, digits, '.' and '-', not starting or ending with '-'"
        ));
    }
    Ok(())
}

pub struct HostnameHandler;

#[async_trait]
impl CommandHandler for HostnameHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let new_name = match ctx.require(&["new_hostname"]) {
            Ok(name) => name,
            Err(missing) => return missing,
        };
        if let Err(reason) = validate_hostname(new_name) {
            return CommandResult::failed(reason);
        }

        if let Err(e) = ctx.services.system.rename_host(new_name).await {
            return CommandResult::failed(format!("Failed to change hostname: {e:#}"));
        }
        info!("[CMD] Hostname changed to {}", new_name);

        // The server shows the new name without waiting for the next inventory cycle
        if let Err(e) = ctx
            .services
            .reporter
            .push_inventory(ctx.token, ctx.server_id)
            .await
        {
            warn!("[CMD] Inventory push after rename failed: {}", e);
        }
        CommandResult::completed(format!(
            "Hostname changed to {new_name}. A restart may be required to apply it everywhere."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::handlers::testing::Harness;
    use crate::platform::fake::FakeSystem;
    use crate::rpc::fake::FakeRpc;
    use lab_agent_shared::CommandParams;
    use std::sync::Arc;

    #[test]
    fn test_hostname_grammar() {
        assert!(validate_hostname("lab-pc01").is_ok());
        assert!(validate_hostname("A1").is_ok());
        assert!(validate_hostname("x").is_ok());
        assert!(validate_hostname(&"a".repeat(63)).is_ok());

        assert!(validate_hostname("").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
        assert!(validate_hostname("-lab").is_err());
        assert!(validate_hostname("lab-").is_err());
        assert!(validate_hostname("lab_pc").is_err());
        assert!(validate_hostname("lab pc").is_err());
        assert!(validate_hostname("läb").is_err());
    }

    #[tokio::test]
    async fn test_rename_pushes_inventory() {
        let rpc = Arc::new(FakeRpc::new());
        let h = Harness::new(rpc.clone(), Arc::new(FakeSystem::new("linux")));

        let result = h
            .run(&HostnameHandler, CommandParams::new().with("new_hostname", "lab-pc07"))
            .await;
        assert!(result.is_success());
        assert_eq!(h.system.calls(), vec!["rename lab-pc07".to_string()]);
        assert_eq!(rpc.state.lock().unwrap().inventory.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_name_never_reaches_platform() {
        let h = Harness::new(Arc::new(FakeRpc::new()), Arc::new(FakeSystem::new("linux")));
        let result = h
            .run(&HostnameHandler, CommandParams::new().with("new_hostname", "bad_name"))
            .await;
        assert!(!result.is_success());
        assert!(h.system.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rename_failure_reported() {
        let system = Arc::new(FakeSystem::with_state("windows", |s| s.rename_fails = true));
        let h = Harness::new(Arc::new(FakeRpc::new()), system);
        let result = h
            .run(&HostnameHandler, CommandParams::new().with("new_hostname", "LAB-01"))
            .await;
        assert_eq!(result, CommandResult::failed("Failed to change hostname: access denied"));
    }
}
