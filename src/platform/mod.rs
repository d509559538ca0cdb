//! Platform capability layer
//!
//! Everything that touches the operating system goes through `SystemActions`.
//! The implementation is picked once at startup; handlers never branch on the
//! platform themselves.

mod linux;
mod processes;
mod runner;
mod windows;

#[cfg(test)]
pub mod fake;

pub use linux::LinuxSystem;
pub use processes::ProcessTable;
pub use runner::{ProcessOutput, RunError};
pub use windows::{WindowsSystem, SET_WALLPAPER_PS};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lab_agent_shared::ProcessInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Maximum number of installed packages reported
pub const SOFTWARE_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Shutdown,
    Restart,
}

/// One installed package as reported in the inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareEntry {
    pub name: String,
    pub version: Option<String>,
    pub vendor: Option<String>,
}

/// OS side effects available to handlers, reports and the session bridge
#[async_trait]
pub trait SystemActions: Send + Sync {
    /// Platform tag sent with update checks ("linux", "windows")
    fn platform(&self) -> &'static str;

    fn hostname(&self) -> String;

    /// Whether the agent itself runs inside a logged-in desktop session
    fn has_interactive_session(&self) -> bool;

    /// Issue a delayed shutdown/restart directive
    async fn power(&self, action: PowerAction, delay: Duration) -> Result<()>;

    /// Lock the active session, returning the mechanism that worked
    async fn lock_session(&self) -> Result<String>;

    /// Show an alert to the logged-in user
    async fn show_alert(&self, text: &str) -> Result<()>;

    /// Desktop notification, best effort
    async fn notify(&self, title: &str, body: &str) -> Result<()>;

    /// Apply an already validated host name
    async fn rename_host(&self, new_name: &str) -> Result<()>;

    async fn run_shell(&self, command_line: &str, limit: Duration)
        -> Result<ProcessOutput, RunError>;

    async fn run_program(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        limit: Duration,
    ) -> Result<ProcessOutput, RunError>;

    /// Start a program that keeps running after the agent exits
    fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()>;

    async fn processes(&self, limit: usize) -> Vec<ProcessInfo>;

    async fn terminate(&self, pid: u32, grace: Duration) -> Result<()>;

    /// User-visible drop directories, most preferred first
    fn delivery_dirs(&self) -> Vec<PathBuf>;

    /// Scratch drop directory used when no preferred one is writable
    fn fallback_delivery_dir(&self) -> PathBuf;

    async fn installed_software(&self) -> Vec<SoftwareEntry>;

    async fn current_wallpaper(&self) -> Option<PathBuf>;

    async fn apply_wallpaper(&self, image: &Path) -> Result<()>;
}

/// Pick the implementation for the running platform
pub fn detect() -> Arc<dyn SystemActions> {
    if cfg!(windows) {
        Arc::new(WindowsSystem::new())
    } else {
        Arc::new(LinuxSystem::new())
    }
}

/// Wrap text in single quotes for a POSIX shell
pub fn quote_posix(text: &str) -> String {
    format!("'{}'", text.replace('\'', r#"'"'"'"#))
}

/// Try each (program, args) in order until one exits successfully
///
/// Returns the program that worked, or every failure reason joined.
pub(crate) async fn first_success(
    attempts: &[(&str, &[&str])],
    limit: Duration,
) -> Result<String> {
    let mut reasons = Vec::new();
    for (program, args) in attempts {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match runner::run(program, &args, None, limit).await {
            Ok(out) if out.success() => return Ok(program.to_string()),
            Ok(out) => reasons.push(format!("{program}: {}", out.describe())),
            Err(e) => reasons.push(format!("{program}: {e}")),
        }
        debug!("{} did not succeed, trying next", program);
    }
    Err(anyhow!(reasons.join("; ")))
}

/// Replace (or add) the `127.0.1.1` line of an /etc/hosts file
pub fn rewrite_hosts(contents: &str, hostname: &str) -> String {
    let entry = format!("127.0.1.1\t{hostname}");
    let mut replaced = false;
    let mut lines: Vec<String> = contents
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("127.0.1.1") {
                replaced = true;
                entry.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(entry);
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
