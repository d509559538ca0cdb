//! Software installation handler
//!
//! The installer is first normalized to a local file (server upload, external
//! URL or UNC share), then executed according to its type under a hard timeout.

use crate::acquire::{basename, extract_zip, is_http_url};
use crate::command::{CommandHandler, CommandResult, HandlerContext};
use crate::platform::{PowerAction, ProcessOutput, RunError};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lab_agent_shared::limits;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

const SILENT_EXE_ARGS: &[&str] = &["/S", "/quiet", "/silent", "/VERYSILENT"];
const REBOOT_DELAY: Duration = Duration::from_secs(30);
const EXTRACT_DIR: &str = "extracted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallerKind {
    Msi,
    Exe,
    Zip,
}

impl InstallerKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".msi") {
            Some(InstallerKind::Msi)
        } else if lower.ends_with(".exe") {
            Some(InstallerKind::Exe)
        } else if lower.ends_with(".zip") {
            Some(InstallerKind::Zip)
        } else {
            None
        }
    }

    fn label(&self) -> &'static str {
        match self {
            InstallerKind::Msi => "MSI",
            InstallerKind::Exe => "EXE",
            InstallerKind::Zip => "ZIP",
        }
    }
}

/// Program and arguments that run `installer` unattended
pub fn installer_command(
    installer: &Path,
    kind: InstallerKind,
    extra_args: &str,
    silent: bool,
) -> (String, Vec<String>) {
    let extra = extra_args.split_whitespace().map(str::to_string);
    match kind {
        InstallerKind::Msi => {
            let mut args = vec![
                "/i".to_string(),
                installer.display().to_string(),
                if silent { "/qn" } else { "/qb" }.to_string(),
            ];
            args.extend(extra);
            ("msiexec".to_string(), args)
        }
        _ => {
            let mut args: Vec<String> = extra.collect();
            if args.is_empty() && silent {
                args = SILENT_EXE_ARGS.iter().map(|a| a.to_string()).collect();
            }
            (installer.display().to_string(), args)
        }
    }
}

/// First `.exe` or `.msi` below `dir`, in name order
fn find_installer(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(InstallerKind::from_name)
                .is_some_and(|k| k != InstallerKind::Zip)
        })
}

fn describe_run(kind: InstallerKind, out: &ProcessOutput) -> String {
    let code = out
        .code
        .map_or_else(|| "none (terminated)".to_string(), |c| c.to_string());
    let mut lines = vec![format!("{} Installer executed with return code: {}", kind.label(), code)];
    if !out.stdout.trim().is_empty() {
        lines.push(format!("STDOUT: {}", out.stdout.trim_end()));
    }
    if !out.stderr.trim().is_empty() {
        lines.push(format!("STDERR: {}", out.stderr.trim_end()));
    }
    lines.join("\n")
}

pub struct InstallHandler;

impl InstallHandler {
    /// Bring the installer to a local file
    async fn acquire(&self, ctx: &HandlerContext<'_>) -> Result<PathBuf> {
        let params = ctx.params();
        let services = ctx.services;
        let scratch = services.config.scratch_dir();
        let limit = Duration::from_millis(limits::DOWNLOAD_TIMEOUT_MS);

        match params.str("method").unwrap_or("") {
            "upload" => {
                let file_id = params
                    .str("file_id")
                    .ok_or_else(|| anyhow!("Missing file_id for upload method"))?;
                ctx.progress("Downloading installer from server...").await;
                let url = services.rpc.installer_url(file_id);
                services
                    .acquirer
                    .download(Some(ctx.token), &url, &scratch, None, limit)
                    .await
            }
            "url" => {
                let url = params
                    .str("installer_url")
                    .ok_or_else(|| anyhow!("Missing installer_url for url method"))?;
                if !is_http_url(url) {
                    bail!("Installer URL must use http or https");
                }
                if basename(url).and_then(InstallerKind::from_name).is_none() {
                    bail!("Installer URL must point to a .exe, .msi or .zip file");
                }
                ctx.progress("Downloading installer from URL...").await;
                services.acquirer.download(None, url, &scratch, None, limit).await
            }
            "network" => {
                let share = params
                    .str("network_path")
                    .ok_or_else(|| anyhow!("Missing network_path for network method"))?;
                if !share.starts_with(r"\\") {
                    bail!(r"Network path must be a UNC path (\\server\share\...)");
                }
                ctx.progress("Copying installer from network share...").await;
                services.acquirer.copy(Path::new(share), &scratch, None).await
            }
            other => bail!("Unknown installation method: {other}"),
        }
    }

    /// Run the installer; `Ok` carries whether it succeeded and its report
    async fn execute(&self, ctx: &HandlerContext<'_>, installer: &Path) -> Result<(bool, String)> {
        let name = installer
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let kind = InstallerKind::from_name(name)
            .ok_or_else(|| anyhow!("Unsupported installer type: {name}"))?;
        if kind != InstallerKind::Zip {
            return self.run_installer(ctx, installer, kind).await;
        }

        // Nothing from an earlier archive may be picked up, whatever the outcome
        let dir = installer.parent().unwrap_or(Path::new(".")).join(EXTRACT_DIR);
        remove_extracted(&dir);
        let outcome = self.run_archive(ctx, installer, &dir).await;
        remove_extracted(&dir);
        outcome
    }

    async fn run_archive(
        &self,
        ctx: &HandlerContext<'_>,
        archive: &Path,
        dir: &Path,
    ) -> Result<(bool, String)> {
        let (from, to) = (archive.to_path_buf(), dir.to_path_buf());
        tokio::task::spawn_blocking(move || extract_zip(&from, &to))
            .await
            .context("extraction task failed")??;
        let Some(found) = find_installer(dir) else {
            return Ok((false, "No installer found in ZIP file".to_string()));
        };
        let kind = found
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(InstallerKind::from_name)
            .unwrap_or(InstallerKind::Exe);
        info!("[CMD] Found {} in archive", found.display());
        self.run_installer(ctx, &found, kind).await
    }

    async fn run_installer(
        &self,
        ctx: &HandlerContext<'_>,
        target: &Path,
        kind: InstallerKind,
    ) -> Result<(bool, String)> {
        let params = ctx.params();
        let extra_args = params.str("install_args").unwrap_or("");
        let silent = params.bool("silent_mode", true);

        let (program, args) = installer_command(target, kind, extra_args, silent);
        let limit = Duration::from_millis(limits::INSTALL_TIMEOUT_MS);
        match ctx
            .services
            .system
            .run_program(&program, &args, target.parent(), limit)
            .await
        {
            Ok(out) => Ok((out.success(), describe_run(kind, &out))),
            Err(RunError::TimedOut(limit)) => Ok((
                false,
                format!("Installation timed out after {} seconds", limit.as_secs()),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn cleanup(&self, installer: &Path) {
        if let Err(e) = std::fs::remove_file(installer) {
            warn!("[CMD] Could not remove installer {}: {}", installer.display(), e);
        }
    }
}

fn remove_extracted(dir: &Path) {
    if !dir.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!("[CMD] Could not remove {}: {}", dir.display(), e);
    }
}

#[async_trait]
impl CommandHandler for InstallHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> CommandResult {
        let software = ctx.params().str("software_name").unwrap_or("Unknown");

        let installer = match self.acquire(ctx).await {
            Ok(path) => path,
            Err(e) => return CommandResult::failed(format!("{e:#}")),
        };

        ctx.progress("Running installer...").await;
        let (success, mut output) = match self.execute(ctx, &installer).await {
            Ok(run) => run,
            Err(e) => (false, format!("Installation failed: {e:#}")),
        };

        if success {
            self.cleanup(&installer);
            if ctx.params().bool("reboot_after", false) {
                match ctx
                    .services
                    .system
                    .power(PowerAction::Restart, REBOOT_DELAY)
                    .await
                {
                    Ok(()) => output.push_str("\n[Reboot scheduled in 30 seconds]"),
                    Err(e) => output.push_str(&format!("\n[Reboot could not be scheduled: {e:#}]")),
                }
            }
        }

        let message = format!("Software: {software}\n{output}");
        if success {
            CommandResult::completed(message)
        } else {
            CommandResult::failed(message)
        }
    }
}
