//! Windows system actions
//!
//! Built on every platform; it only shells out to stock Windows tools.

use super::runner::{self, ProcessOutput, RunError};
use super::{
    first_success, PowerAction, ProcessTable, SoftwareEntry, SystemActions,
    SOFTWARE_LIMIT,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lab_agent_shared::{limits, ProcessInfo};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tracing::info;

/// PowerShell that sets the wallpaper of the calling user from `$img`
pub const SET_WALLPAPER_PS: &str = r#"Add-Type -TypeDefinition @"
using System.Runtime.InteropServices;
public class LabWallpaper {
  [DllImport("user32.dll", CharSet = CharSet.Auto)]
  public static extern int SystemParametersInfo(int uAction, int uParam, string lpvParam, int fuWinIni);
}
"@
[LabWallpaper]::SystemParametersInfo(20, 0, $img, 3) | Out-Null"#;

const NOTIFY_SECONDS: u32 = 30;

const UNINSTALL_KEYS: &str = "'HKLM:\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\*',\
'HKLM:\\SOFTWARE\\WOW6432Node\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\*',\
'HKCU:\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\*'";

pub struct WindowsSystem {
    processes: ProcessTable,
}

impl Default for WindowsSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowsSystem {
    pub fn new() -> Self {
        Self {
            processes: ProcessTable::new(),
        }
    }

    async fn powershell(&self, script: &str) -> Result<ProcessOutput> {
        let args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-Command".to_string(),
            script.to_string(),
        ];
        let out = runner::run(
            "powershell",
            &args,
            None,
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await?;
        if !out.success() {
            return Err(anyhow!("powershell failed: {}", out.describe()));
        }
        Ok(out)
    }
}

#[async_trait]
impl SystemActions for WindowsSystem {
    fn platform(&self) -> &'static str {
        "windows"
    }

    fn hostname(&self) -> String {
        System::host_name().unwrap_or_else(|| "unknown".into())
    }

    fn has_interactive_session(&self) -> bool {
        // Services run as SYSTEM, whose USERNAME is the machine account (NAME$)
        match env::var("USERNAME") {
            Ok(user) => !user.ends_with('$') && !user.eq_ignore_ascii_case("SYSTEM"),
            Err(_) => false,
        }
    }

    async fn power(&self, action: PowerAction, delay: Duration) -> Result<()> {
        let flag = match action {
            PowerAction::Shutdown => "/s",
            PowerAction::Restart => "/r",
        };
        let args = vec![flag.to_string(), "/t".to_string(), delay.as_secs().to_string()];
        let out = runner::run(
            "shutdown",
            &args,
            None,
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await?;
        if out.success() {
            Ok(())
        } else {
            Err(anyhow!("shutdown failed: {}", out.describe()))
        }
    }

    async fn lock_session(&self) -> Result<String> {
        first_success(
            &[
                ("rundll32.exe", &["user32.dll,LockWorkStation"]),
                ("tsdiscon", &[]),
            ],
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await
    }

    async fn show_alert(&self, text: &str) -> Result<()> {
        let out = runner::run(
            "msg",
            &msg_args(None, text),
            None,
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await?;
        if out.success() {
            Ok(())
        } else {
            Err(anyhow!("msg failed: {}", out.describe()))
        }
    }

    async fn notify(&self, title: &str, body: &str) -> Result<()> {
        let text = format!("{title}: {body}");
        let out = runner::run(
            "msg",
            &msg_args(Some(NOTIFY_SECONDS), &text),
            None,
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await?;
        if out.success() {
            Ok(())
        } else {
            Err(anyhow!("msg failed: {}", out.describe()))
        }
    }

    async fn rename_host(&self, new_name: &str) -> Result<()> {
        // new_name is validated to [A-Za-z0-9.-] before it gets here
        self.powershell(&format!(
            "Rename-Computer -NewName '{new_name}' -Force -ErrorAction Stop"
        ))
        .await
        .map(|_| ())
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
        let public = env::var("PUBLIC").unwrap_or_else(|_| "C:\\Users\\Public".into());
        vec![PathBuf::from(public).join("Desktop").join("Received")]
    }

    fn fallback_delivery_dir(&self) -> PathBuf {
        PathBuf::from("C:\\Temp\\Received")
    }

    async fn installed_software(&self) -> Vec<SoftwareEntry> {
        let script = format!(
            "Get-ItemProperty {UNINSTALL_KEYS} -ErrorAction SilentlyContinue | \
             Where-Object {{ $_.DisplayName }} | \
             Select-Object DisplayName, DisplayVersion, Publisher | ConvertTo-Json -Compress"
        );
        match self.powershell(&script).await {
            Ok(out) => parse_uninstall_json(&out.stdout),
            Err(e) => {
                info!("[REPORT] Software inventory unavailable: {}", e);
                Vec::new()
            }
        }
    }

    async fn current_wallpaper(&self) -> Option<PathBuf> {
        let args: Vec<String> = ["query", "HKCU\\Control Panel\\Desktop", "/v", "Wallpaper"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = runner::run(
            "reg",
            &args,
            None,
            Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS),
        )
        .await
        .ok()?;
        parse_reg_wallpaper(&out.stdout)
    }

    async fn apply_wallpaper(&self, image: &Path) -> Result<()> {
        let script = format!(
            "$img = '{}'\n{}",
            image.display().to_string().replace('\'', "''"),
            SET_WALLPAPER_PS
        );
        self.powershell(&script).await.map(|_| ())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UninstallEntry {
    display_name: Option<String>,
    display_version: Option<String>,
    publisher: Option<String>,
}

/// ConvertTo-Json emits an object for one row and an array for several
fn parse_uninstall_json(raw: &str) -> Vec<SoftwareEntry> {
    let raw = raw.trim();
    let rows: Vec<UninstallEntry> = if raw.starts_with('[') {
        serde_json::from_str(raw).unwrap_or_default()
    } else {
        serde_json::from_str::<UninstallEntry>(raw)
            .map(|row| vec![row])
            .unwrap_or_default()
    };

    let mut seen = HashSet::new();
    rows.into_iter()
        .filter_map(|row| {
            let name = row.display_name?.trim().to_string();
            if name.is_empty() || !seen.insert(name.clone()) {
                return None;
            }
            Some(SoftwareEntry {
                name,
                version: row.display_version,
                vendor: row.publisher,
            })
        })
        .take(SOFTWARE_LIMIT)
        .collect()
}

fn parse_reg_wallpaper(stdout: &str) -> Option<PathBuf> {
    stdout.lines().find_map(|line| {
        let (_, value) = line.trim().split_once("REG_SZ")?;
        let value = value.trim();
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}

/// Arguments for `msg`, run without a shell so the text stays one argument
fn msg_args(seconds: Option<u32>, text: &str) -> Vec<String> {
    let mut args = vec!["*".to_string()];
    if let Some(secs) = seconds {
        args.push(format!("/TIME:{secs}"));
    }
    args.push(text.to_string());
    args
}
