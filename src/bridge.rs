//! Session bridge - stages actions for execution inside the logged-in user's session
//!
//! The agent usually runs as a service without a desktop. Directives are
//! written to a shared staging directory; a companion script run in the user
//! session (by a scheduled task or at logon) picks them up.

use crate::platform::{SystemActions, SET_WALLPAPER_PS};
use anyhow::{Context, Result};
use lab_agent_shared::{limits, now_ms};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scheduled task that runs the companion script in the user session
pub const TASK_NAME: &str = "LabAgentSession";

const WALLPAPER_DIRECTIVE: &str = "pending_wallpaper.txt";
const LOCK_DIRECTIVE: &str = "pending_lock.txt";

/// Something to do in the user session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Apply this image as the desktop wallpaper (re-applied at every logon)
    Wallpaper(PathBuf),
    /// Lock the session; honored only shortly after it was staged
    Lock,
}

/// Whether the staged directive was handed to a live session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    Triggered,
    /// Staged only; runs at the next logon
    Deferred,
}

pub struct SessionBridge {
    system: Arc<dyn SystemActions>,
    staging_dir: PathBuf,
    logon_dir: PathBuf,
}

impl SessionBridge {
    pub fn new(system: Arc<dyn SystemActions>, staging_dir: impl Into<PathBuf>) -> Self {
        let logon_dir = default_logon_dir(system.platform());
        Self {
            system,
            staging_dir: staging_dir.into(),
            logon_dir,
        }
    }

    #[cfg(test)]
    pub fn with_logon_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logon_dir = dir.into();
        self
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    fn is_windows(&self) -> bool {
        self.system.platform() == "windows"
    }

    pub fn script_path(&self) -> PathBuf {
        let name = if self.is_windows() {
            "session_trigger.ps1"
        } else {
            "session_trigger.sh"
        };
        self.staging_dir.join(name)
    }

    pub fn logon_entry_path(&self) -> PathBuf {
        let name = if self.is_windows() {
            "LabAgentSession.cmd"
        } else {
            "lab-agent-session.desktop"
        };
        self.logon_dir.join(name)
    }

    /// Stage, make sure the companions exist, then trigger
    pub async fn dispatch(&self, directive: &Directive) -> Result<BridgeOutcome> {
        self.stage(directive)?;
        self.ensure_companions().await?;
        let outcome = self.trigger().await;
        info!("[BRIDGE] {:?} staged ({:?})", directive, outcome);
        Ok(outcome)
    }

    /// Write the directive file; the last write wins
    pub fn stage(&self, directive: &Directive) -> Result<PathBuf> {
        fs::create_dir_all(&self.staging_dir)
            .with_context(|| format!("creating {}", self.staging_dir.display()))?;

        let (file, contents) = match directive {
            Directive::Wallpaper(image) => {
                let staged = self.stage_image(image)?;
                (WALLPAPER_DIRECTIVE, staged.display().to_string())
            }
            Directive::Lock => (LOCK_DIRECTIVE, (now_ms() / 1000).to_string()),
        };
        let path = self.staging_dir.join(file);
        write_atomic(&path, contents.as_bytes())?;
        Ok(path)
    }

    /// Copy the image next to the directive so the session user can read it
    fn stage_image(&self, image: &Path) -> Result<PathBuf> {
        if image.parent() == Some(self.staging_dir.as_path()) {
            return Ok(image.to_path_buf());
        }
        let ext = image
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg");
        let target = self.staging_dir.join(format!("wallpaper.{ext}"));
        fs::copy(image, &target)
            .with_context(|| format!("copying {} into staging", image.display()))?;
        Ok(target)
    }

    /// Create the companion script and logon entry if missing
    pub async fn ensure_companions(&self) -> Result<()> {
        let script = self.script_path();
        if !script.exists() {
            fs::create_dir_all(&self.staging_dir)?;
            let body = if self.is_windows() {
                windows_script()
            } else {
                LINUX_SCRIPT.to_string()
            };
            fs::write(&script, body).with_context(|| format!("writing {}", script.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
            }
            if self.is_windows() {
                self.grant_users_read().await;
            }
            info!("[BRIDGE] Created {}", script.display());
        }

        let entry = self.logon_entry_path();
        if !entry.exists() {
            fs::create_dir_all(&self.logon_dir)
                .with_context(|| format!("creating {}", self.logon_dir.display()))?;
            let body = if self.is_windows() {
                format!(
                    "@echo off\r\npowershell -NoProfile -ExecutionPolicy Bypass -WindowStyle Hidden -File \"{}\"\r\n",
                    script.display()
                )
            } else {
                format!(
                    "[Desktop Entry]\nType=Application\nName=Lab Agent Session\nExec=sh \"{}\"\nNoDisplay=true\nX-GNOME-Autostart-enabled=true\n",
                    script.display()
                )
            };
            fs::write(&entry, body).with_context(|| format!("writing {}", entry.display()))?;
            info!("[BRIDGE] Created logon entry {}", entry.display());
        }
        Ok(())
    }

    async fn grant_users_read(&self) {
        let args = vec![
            self.staging_dir.display().to_string(),
            "/grant".to_string(),
            "*S-1-5-32-545:(OI)(CI)RX".to_string(),
        ];
        let limit = Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS);
        match self.system.run_program("icacls", &args, None, limit).await {
            Ok(out) if out.success() => {}
            Ok(out) => warn!("[BRIDGE] icacls failed: {}", out.describe()),
            Err(e) => warn!("[BRIDGE] icacls failed: {}", e),
        }
    }

    /// Run the companion now if the platform allows it
    async fn trigger(&self) -> BridgeOutcome {
        if !self.is_windows() {
            debug!("[BRIDGE] No session scheduler here, deferring to next logon");
            return BridgeOutcome::Deferred;
        }
        let args = vec!["/run".to_string(), "/tn".to_string(), TASK_NAME.to_string()];
        let limit = Duration::from_millis(limits::OS_HELPER_TIMEOUT_MS);
        match self.system.run_program("schtasks", &args, None, limit).await {
            Ok(out) if out.success() => BridgeOutcome::Triggered,
            Ok(out) => {
                warn!("[BRIDGE] Task {} not run: {}", TASK_NAME, out.describe());
                BridgeOutcome::Deferred
            }
            Err(e) => {
                warn!("[BRIDGE] Task {} not run: {}", TASK_NAME, e);
                BridgeOutcome::Deferred
            }
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn default_logon_dir(platform: &str) -> PathBuf {
    if platform == "windows" {
        let base = std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".into());
        PathBuf::from(base)
            .join("Microsoft")
            .join("Windows")
            .join("Start Menu")
            .join("Programs")
            .join("StartUp")
    } else {
        PathBuf::from("/etc/xdg/autostart")
    }
}

fn windows_script() -> String {
    format!(
        r#"$dir = Split-Path -Parent $MyInvocation.MyCommand.Path
$wall = Join-Path $dir '{WALLPAPER_DIRECTIVE}'
if (Test-Path $wall) {{
  $img = (Get-Content -Raw $wall).Trim()
  if ($img -and (Test-Path $img)) {{
{SET_WALLPAPER_PS}
  }}
}}
$lock = Join-Path $dir '{LOCK_DIRECTIVE}'
if (Test-Path $lock) {{
  $ts = [int64]((Get-Content -Raw $lock).Trim())
  $now = [DateTimeOffset]::UtcNow.ToUnixTimeSeconds()
  if (($now - $ts) -lt 120) {{ rundll32.exe user32.dll,LockWorkStation }}
}}
"#
    )
}

const LINUX_SCRIPT: &str = r#"#!/bin/sh
dir="$(dirname "$0")"
if [ -f "$dir/pending_wallpaper.txt" ]; then
  img="$(cat "$dir/pending_wallpaper.txt")"
  if [ -f "$img" ]; then
    gsettings set org.gnome.desktop.background picture-uri "file://$img"
    gsettings set org.gnome.desktop.background picture-uri-dark "file://$img" 2>/dev/null
  fi
fi
if [ -f "$dir/pending_lock.txt" ]; then
  ts="$(cat "$dir/pending_lock.txt")"
  now="$(date +%s)"
  if [ $((now - ts)) -lt 120 ]; then
    loginctl lock-session || xdg-screensaver lock
  fi
fi
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeSystem;
    use crate::platform::ProcessOutput;

    fn bridge(system: Arc<FakeSystem>, root: &Path) -> SessionBridge {
        SessionBridge::new(system, root.join("staging")).with_logon_dir(root.join("logon"))
    }

    #[test]
    fn test_stage_last_write_wins() {
        let root = tempfile::tempdir().unwrap();
        let b = bridge(Arc::new(FakeSystem::new("linux")), root.path());
        let a = root.path().join("a.png");
        let c = root.path().join("c.jpg");
        fs::write(&a, b"A").unwrap();
        fs::write(&c, b"C").unwrap();

        b.stage(&Directive::Wallpaper(a)).unwrap();
        let path = b.stage(&Directive::Wallpaper(c)).unwrap();

        let staged = PathBuf::from(fs::read_to_string(path).unwrap());
        assert_eq!(staged, root.path().join("staging").join("wallpaper.jpg"));
        assert_eq!(fs::read(staged).unwrap(), b"C");
    }

    #[tokio::test]
    async fn test_companions_created_once() {
        let root = tempfile::tempdir().unwrap();
        let system = Arc::new(FakeSystem::new("windows"));
        let b = bridge(system.clone(), root.path());

        b.ensure_companions().await.unwrap();
        let script = b.script_path();
        assert!(fs::read_to_string(&script).unwrap().contains(LOCK_DIRECTIVE));
        assert!(fs::read_to_string(b.logon_entry_path())
            .unwrap()
            .contains("session_trigger.ps1"));

        fs::write(&script, "customized").unwrap();
        b.ensure_companions().await.unwrap();
        assert_eq!(fs::read_to_string(&script).unwrap(), "customized");

        let icacls = system.calls().iter().filter(|c| c.starts_with("run icacls")).count();
        assert_eq!(icacls, 1);
    }

    #[tokio::test]
    async fn test_windows_dispatch_runs_task() {
        let root = tempfile::tempdir().unwrap();
        let system = Arc::new(FakeSystem::new("windows"));
        let b = bridge(system.clone(), root.path());

        let outcome = b.dispatch(&Directive::Lock).await.unwrap();
        assert_eq!(outcome, BridgeOutcome::Triggered);
        assert!(system
            .calls()
            .contains(&format!("run schtasks /run /tn {TASK_NAME}")));
        assert!(root.path().join("staging").join(LOCK_DIRECTIVE).exists());
    }

    #[tokio::test]
    async fn test_missing_task_defers() {
        let root = tempfile::tempdir().unwrap();
        let system = Arc::new(FakeSystem::with_state("windows", |s| {
            s.program_results.push((
                "schtasks".into(),
                ProcessOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "ERROR: The system cannot find the file specified.".into(),
                },
            ));
        }));
        let outcome = bridge(system, root.path())
            .dispatch(&Directive::Lock)
            .await
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::Deferred);
    }

    #[tokio::test]
    async fn test_linux_defers_to_autostart() {
        let root = tempfile::tempdir().unwrap();
        let system = Arc::new(FakeSystem::new("linux"));
        let b = bridge(system.clone(), root.path());

        assert_eq!(b.dispatch(&Directive::Lock).await.unwrap(), BridgeOutcome::Deferred);
        assert!(b.logon_entry_path().ends_with("lab-agent-session.desktop"));
        assert!(fs::read_to_string(b.logon_entry_path())
            .unwrap()
            .contains("session_trigger.sh"));
        assert!(system.calls().is_empty());
    }
}
