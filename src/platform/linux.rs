//! Linux system actions

use super::runner::{self, ProcessOutput, RunError};
use super::{
    first_success, quote_posix, rewrite_hosts, PowerAction, ProcessTable, SoftwareEntry,
    SystemActions, SOFTWARE_LIMIT,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lab_agent_shared::{limits, ProcessInfo};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tracing::{info, warn};

const HOSTNAME_FILE: &str = "/etc/hostname";
const HOSTS_FILE: &str = "/etc/hosts";

pub struct LinuxSystem {
    processes: ProcessTable,
}

impl Default for LinuxSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxSystem {
    pub fn new() -> Self {
        Self {
            processes: ProcessTable::new(),
        }
    }

    /// Home of the human user, even when running under sudo
    fn user_home(&self) -> Option<PathBuf> {
        if let Ok(user) = env::var("SUDO_USER") {
            if !user.is_empty() && user != "root" {
                return Some(PathBuf::from("/home").join(user));
            }
        }
        env::var_os("HOME").map(PathBuf::from)
    }

    async fn helper(&self, program: &str, args: &[&str]) -> Result<ProcessOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let out = runner::run(
            program,
            &args,
            None,
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await?;
        if !out.success() {
            return Err(anyhow!("{program} failed: {}", out.describe()));
        }
        Ok(out)
    }
}

#[async_trait]
impl SystemActions for LinuxSystem {
    fn platform(&self) -> &'static str {
        "linux"
    }

    fn hostname(&self) -> String {
        System::host_name().unwrap_or_else(|| "unknown".into())
    }

    fn has_interactive_session(&self) -> bool {
        env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some()
    }

    async fn power(&self, action: PowerAction, delay: Duration) -> Result<()> {
        // shutdown(8) only takes whole minutes
        let minutes = delay.as_secs().div_ceil(60).max(1);
        let flag = match action {
            PowerAction::Shutdown => "-h",
            PowerAction::Restart => "-r",
        };
        self.helper("shutdown", &[flag, &format!("+{minutes}")])
            .await
            .map(|_| ())
    }

    async fn lock_session(&self) -> Result<String> {
        first_success(
            &[
                ("loginctl", &["lock-sessions"]),
                ("xdg-screensaver", &["lock"]),
                ("gnome-screensaver-command", &["-l"]),
            ],
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await
    }

    async fn show_alert(&self, text: &str) -> Result<()> {
        let notify = format!(
            "notify-send {} {}",
            quote_posix("Alert from Admin"),
            quote_posix(text)
        );
        let limit = Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS);
        match runner::run_shell(&notify, limit).await {
            Ok(out) if out.success() => return Ok(()),
            Ok(out) => warn!("notify-send failed: {}", out.describe()),
            Err(e) => warn!("notify-send failed: {}", e),
        }
        // Terminal sessions still get it
        let out = runner::run_shell(&format!("echo {} | wall", quote_posix(text)), limit).await?;
        if out.success() {
            Ok(())
        } else {
            Err(anyhow!("no alert mechanism succeeded: {}", out.describe()))
        }
    }

    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        self.helper("notify-send", &[title, body]).await.map(|_| ())
    }

    async fn rename_host(&self, new_name: &str) -> Result<()> {
        match self.helper("hostnamectl", &["set-hostname", new_name]).await {
            Ok(_) => return Ok(()),
            Err(e) => warn!("hostnamectl failed ({}), editing files directly", e),
        }
        tokio::fs::write(HOSTNAME_FILE, format!("{new_name}\n"))
            .await
            .with_context(|| format!("writing {HOSTNAME_FILE}"))?;
        let hosts = tokio::fs::read_to_string(HOSTS_FILE)
            .await
            .unwrap_or_default();
        tokio::fs::write(HOSTS_FILE, rewrite_hosts(&hosts, new_name))
            .await
            .with_context(|| format!("writing {HOSTS_FILE}"))?;
        // Best effort for the running kernel; the files cover the next boot
        if let Err(e) = self.helper("hostname", &[new_name]).await {
            warn!("Could not apply hostname to running system: {}", e);
        }
        Ok(())
    }

    async fn run_shell(&self, command_line: &str, limit: Duration) -> Result<ProcessOutput, RunError> {
        runner::run_shell(command_line, limit).await
    }

    async fn run_program(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        limit: Duration,
    ) -> Result<ProcessOutput, RunError> {
        runner::run(program, args, cwd, limit).await
    }

    fn spawn_detached(&self, program: &Path, args: &[String]) -> Result<()> {
        runner::spawn_detached(program, args)
            .with_context(|| format!("starting {}", program.display()))
    }

    async fn processes(&self, limit: usize) -> Vec<ProcessInfo> {
        self.processes.top_by_cpu(limit).await
    }

    async fn terminate(&self, pid: u32, grace: Duration) -> Result<()> {
        self.processes.terminate(pid, grace).await
    }

    fn delivery_dirs(&self) -> Vec<PathBuf> {
        self.user_home()
            .map(|home| home.join("Desktop"))
            .filter(|desktop| desktop.is_dir())
            .map(|desktop| vec![desktop.join("Received")])
            .unwrap_or_default()
    }

    fn fallback_delivery_dir(&self) -> PathBuf {
        PathBuf::from("/tmp/Received")
    }

    async fn installed_software(&self) -> Vec<SoftwareEntry> {
        match self.helper("dpkg", &["-l"]).await {
            Ok(out) => parse_dpkg_list(&out.stdout),
            Err(e) => {
                info!("[REPORT] Software inventory unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn current_wallpaper(&self) -> Option<PathBuf> {
        let out = self
            .helper("gsettings", &["get", "org.gnome.desktop.background", "picture-uri"])
            .await
            .ok()?;
        parse_gsettings_uri(&out.stdout)
    }

    async fn apply_wallpaper(&self, image: &Path) -> Result<()> {
        let uri = format!("file://{}", image.display());
        self.helper(
            "gsettings",
            &["set", "org.gnome.desktop.background", "picture-uri", &uri],
        )
        .await?;
        // Older GNOME has no dark variant
        let _ = self
            .helper(
                "gsettings",
                &["set", "org.gnome.desktop.background", "picture-uri-dark", &uri],
            )
            .await;
        Ok(())
    }
}

/// Installed (`ii`) rows of `dpkg -l`
fn parse_dpkg_list(stdout: &str) -> Vec<SoftwareEntry> {
    stdout
        .lines()
        .filter(|line| line.starts_with("ii"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace().skip(1);
            let name = parts.next()?;
            let version = parts.next()?;
            Some(SoftwareEntry {
                name: name.to_string(),
                version: Some(version.to_string()),
                vendor: None,
            })
        })
        .take(SOFTWARE_LIMIT)
        .collect()
}

/// `'file:///usr/share/backgrounds/x.png'` -> path
fn parse_gsettings_uri(raw: &str) -> Option<PathBuf> {
    let value = raw.trim().trim_matches('\'');
    let path = value.strip_prefix("file://").unwrap_or(value);
    (!path.is_empty()).then(|| PathBuf::from(path))
}
