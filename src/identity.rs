//! Stable machine identity persisted across restarts

use crate::error::AgentError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use uuid::Uuid;

/// Opaque, stable token identifying this machine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MachineIdentity(String);

impl MachineIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Write-once store for the machine identity
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored identity, creating and persisting one on first run
    ///
    /// If the new identity cannot be persisted it is still returned so the
    /// current run can proceed; the failure is logged.
    pub fn resolve(&self) -> MachineIdentity {
        match self.load() {
            Ok(Some(identity)) => return identity,
            Ok(None) => {}
            Err(e) => error!("[IDENTITY] Error reading identity file: {}", e),
        }

        let identity = MachineIdentity(Uuid::new_v4().to_string());
        match self.persist(&identity) {
            Ok(()) => info!("[IDENTITY] Generated machine id {}", identity),
            Err(e) => error!("[IDENTITY] Error saving identity file: {}", e),
        }
        identity
    }

    fn load(&self) -> Result<Option<MachineIdentity>, AgentError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let id = raw.trim();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(MachineIdentity(id.to_string())))
    }

    fn persist(&self, identity: &MachineIdentity) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, identity.as_str())?;
        Ok(())
    }
}
