//! Update pipeline - check, download, back up, apply, persist version
//!
//! Any failure after the check aborts the run with the backup retained and
//! the version marker untouched, so the next check offers the update again.

use super::backup::create_backup;
use super::VersionStore;
use crate::acquire::{extract_zip, FileAcquirer};
use crate::config::{AgentConfig, Deployment};
use crate::error::AgentError;
use crate::platform::SystemActions;
use crate::rpc::InventoryRpc;
use anyhow::{bail, Context};
use lab_agent_shared::{limits, UpdatePackage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Arguments passed to the vendor installer on hand-off
pub const INSTALLER_ARGS: &[&str] = &["/VERYSILENT", "/CLOSEAPPLICATIONS", "/RESTARTAPPLICATIONS"];

const PACKAGE_FILE: &str = "update_package.zip";
const EXTRACT_DIR: &str = "update_temp";

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The server offered nothing
    UpToDate { current: String },
    /// Files replaced in place and the new version recorded
    Applied { from: String, to: String },
    /// The installer was launched and owns the rest of the update
    HandedOff { to: String, installer: PathBuf },
}

pub struct UpdatePipeline {
    rpc: Arc<dyn InventoryRpc>,
    system: Arc<dyn SystemActions>,
    acquirer: Arc<FileAcquirer>,
    config: Arc<AgentConfig>,
    versions: VersionStore,
    /// Files copied from the package root over the installation
    allow_list: Vec<String>,
    /// Where installer hand-offs are downloaded
    installer_dir: PathBuf,
}

impl UpdatePipeline {
    pub fn new(
        rpc: Arc<dyn InventoryRpc>,
        system: Arc<dyn SystemActions>,
        acquirer: Arc<FileAcquirer>,
        config: Arc<AgentConfig>,
    ) -> Self {
        let versions = VersionStore::from_config(&config);
        let mut allow_list = Vec::new();
        if let Some(exe) = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        {
            allow_list.push(exe);
        }
        allow_list.push(crate::config::PACKAGED_VERSION_FILE.to_string());
        Self {
            rpc,
            system,
            acquirer,
            config,
            versions,
            allow_list,
            installer_dir: std::env::temp_dir(),
        }
    }

    #[cfg(test)]
    pub fn with_allow_list(mut self, files: &[&str]) -> Self {
        self.allow_list = files.iter().map(|f| f.to_string()).collect();
        self
    }

    #[cfg(test)]
    pub fn with_installer_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.installer_dir = dir.into();
        self
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    /// Platform tag sent with update checks
    pub fn platform_tag(&self) -> String {
        match self.config.deployment {
            Deployment::InPlace => self.system.platform().to_string(),
            Deployment::Installer => format!("{}-frozen", self.system.platform()),
        }
    }

    /// Run the whole pipeline once
    pub async fn run(&self, token: &str) -> Result<UpdateOutcome, AgentError> {
        let current = self.versions.current();
        let tag = self.platform_tag();
        info!("[UPDATE] Checking for updates (current {}, platform {})", current, tag);

        let check = self.rpc.check_update(token, &current, &tag).await?;
        let Some(package) = check.package() else {
            info!("[UPDATE] No update available");
            return Ok(UpdateOutcome::UpToDate { current });
        };
        info!("[UPDATE] Update available: {} -> {}", current, package.target_version);

        match self.config.deployment {
            Deployment::InPlace => {
                let result = self.run_in_place(token, &current, &package).await;
                self.cleanup_scratch();
                result
            }
            Deployment::Installer => self.hand_off(token, &current, &package).await,
        }
    }

    async fn run_in_place(
        &self,
        token: &str,
        current: &str,
        package: &UpdatePackage,
    ) -> Result<UpdateOutcome, AgentError> {
        let scratch = self.config.scratch_dir();
        let archive = self
            .download(token, package, &scratch, PACKAGE_FILE)
            .await
            .map_err(|e| abort("download", e))?;

        let backup = self
            .backup(current)
            .await
            .map_err(|e| abort("backup", e))?;
        info!("[UPDATE] Predecessor kept at {}", backup.display());

        self.apply(&archive).await.map_err(|e| abort("apply", e))?;
        self.post_update().await;

        self.versions
            .persist(&package.target_version)
            .map_err(|e| abort("persist", e.into()))?;
        info!("[UPDATE] Now at version {}", package.target_version);

        Ok(UpdateOutcome::Applied {
            from: current.to_string(),
            to: package.target_version.clone(),
        })
    }

    async fn hand_off(
        &self,
        token: &str,
        current: &str,
        package: &UpdatePackage,
    ) -> Result<UpdateOutcome, AgentError> {
        let name = format!("lab-agent-setup-{}.exe", &Uuid::new_v4().simple().to_string()[..8]);
        let installer = self
            .download(token, package, &self.installer_dir, &name)
            .await
            .map_err(|e| abort("download", e))?;

        self.backup(current).await.map_err(|e| abort("backup", e))?;

        let args: Vec<String> = INSTALLER_ARGS.iter().map(|a| a.to_string()).collect();
        self.system
            .spawn_detached(&installer, &args)
            .map_err(|e| abort("apply", e))?;
        info!("[UPDATE] Installer {} launched, handing off", installer.display());

        Ok(UpdateOutcome::HandedOff {
            to: package.target_version.clone(),
            installer,
        })
    }

    async fn download(
        &self,
        token: &str,
        package: &UpdatePackage,
        dir: &Path,
        name: &str,
    ) -> anyhow::Result<PathBuf> {
        let url = self.config.absolute_url(&package.download_ref);
        self.acquirer
            .download(
                Some(token),
                &url,
                dir,
                Some(name),
                Duration::from_millis(limits::DOWNLOAD_TIMEOUT_MS),
            )
            .await
    }

    async fn backup(&self, current: &str) -> anyhow::Result<PathBuf> {
        let agent_dir = self.config.agent_dir.clone();
        let backup_root = self.config.backup_root();
        let version = current.to_string();
        tokio::task::spawn_blocking(move || create_backup(&agent_dir, &backup_root, &version))
            .await
            .context("backup task failed")?
    }

    /// Extract the package and copy the allow-listed files over the installation
    async fn apply(&self, archive: &Path) -> anyhow::Result<()> {
        let agent_dir = self.config.agent_dir.clone();
        let extract_dir = agent_dir.join(EXTRACT_DIR);
        let archive = archive.to_path_buf();
        let allow_list = self.allow_list.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if extract_dir.exists() {
                fs::remove_dir_all(&extract_dir)?;
            }
            extract_zip(&archive, &extract_dir)?;
            let root = package_root(&extract_dir, &allow_list);

            let mut journal = Vec::new();
            match replace_files(&root, &agent_dir, &allow_list, &mut journal) {
                Ok(0) => bail!("package contains none of {}", allow_list.join(", ")),
                Ok(copied) => {
                    info!("[UPDATE] Replaced {} file(s)", copied);
                    Ok(())
                }
                Err(e) => {
                    roll_back(&journal);
                    Err(e)
                }
            }
        })
        .await
        .context("apply task failed")?
    }

    /// Optional dependency reinstall; failure is logged only
    async fn post_update(&self) {
        let Some(cmd) = self.config.post_update_cmd.as_deref() else {
            return;
        };
        let limit = Duration::from_millis(limits::POST_UPDATE_TIMEOUT_MS);
        match self.system.run_shell(cmd, limit).await {
            Ok(out) if out.success() => info!("[UPDATE] Post-update step finished"),
            Ok(out) => warn!("[UPDATE] Post-update step failed: {}", out.describe()),
            Err(e) => warn!("[UPDATE] Post-update step failed: {}", e),
        }
    }

    fn cleanup_scratch(&self) {
        let package = self.config.scratch_dir().join(PACKAGE_FILE);
        if package.exists() {
            if let Err(e) = fs::remove_file(&package) {
                warn!("[UPDATE] Could not remove {}: {}", package.display(), e);
            }
        }
        let extract_dir = self.config.agent_dir.join(EXTRACT_DIR);
        if extract_dir.exists() {
            if let Err(e) = fs::remove_dir_all(&extract_dir) {
                warn!("[UPDATE] Could not remove {}: {}", extract_dir.display(), e);
            }
        }
    }
}

/// A file touched by apply: its target and, if one existed, where the
/// previous file was moved
type Replaced = (PathBuf, Option<PathBuf>);

/// Copy allow-listed files over the installation, journaling each one before
/// it is touched
fn replace_files(
    root: &Path,
    agent_dir: &Path,
    allow_list: &[String],
    journal: &mut Vec<Replaced>,
) -> anyhow::Result<usize> {
    for name in allow_list {
        let source = root.join(name);
        if !source.is_file() {
            continue;
        }
        let target = agent_dir.join(name);
        if target.exists() {
            // A running executable can be renamed but not overwritten
            let old = agent_dir.join(format!("{name}.old"));
            if old.is_file() {
                fs::remove_file(&old).with_context(|| format!("removing {}", old.display()))?;
            }
            fs::rename(&target, &old)
                .with_context(|| format!("moving {} aside", target.display()))?;
            journal.push((target.clone(), Some(old)));
        } else {
            journal.push((target.clone(), None));
        }
        fs::copy(&source, &target).with_context(|| format!("installing {}", target.display()))?;
    }
    Ok(journal.len())
}

/// Undo a partial apply, newest first
fn roll_back(journal: &[Replaced]) {
    for (target, old) in journal.iter().rev() {
        if target.exists() {
            if let Err(e) = fs::remove_file(target) {
                warn!("[UPDATE] Could not remove {}: {}", target.display(), e);
            }
        }
        if let Some(old) = old {
            if let Err(e) = fs::rename(old, target) {
                warn!("[UPDATE] Could not restore {}: {}", target.display(), e);
            }
        }
    }
    if !journal.is_empty() {
        warn!("[UPDATE] Rolled back {} file(s)", journal.len());
    }
}

/// Packages may wrap their files in a single top-level directory
fn package_root(extract_dir: &Path, allow_list: &[String]) -> PathBuf {
    if allow_list.iter().any(|n| extract_dir.join(n).is_file()) {
        return extract_dir.to_path_buf();
    }
    let dirs: Vec<PathBuf> = fs::read_dir(extract_dir)
        .map(|rd| {
            rd.filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default();
    match dirs.as_slice() {
        [only] => only.clone(),
        _ => extract_dir.to_path_buf(),
    }
}

fn abort(stage: &'static str, err: anyhow::Error) -> AgentError {
    warn!("[UPDATE] Aborted during {}: {:#}", stage, err);
    AgentError::PipelineAbort {
        stage,
        reason: format!("{err:#}"),
    }
}
