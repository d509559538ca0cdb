//! Self-update: version tracking, backups and the update pipeline

mod backup;
mod pipeline;

pub use pipeline::{UpdateOutcome, UpdatePipeline};

use crate::config::AgentConfig;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::warn;

/// Reported when no version file exists
pub const UNKNOWN_VERSION: &str = "0.0.0";

/// Reads and writes the installed agent version
#[derive(Debug, Clone)]
pub struct VersionStore {
    /// Written by the pipeline after a successful apply
    marker: PathBuf,
    /// Shipped inside packages
    packaged: PathBuf,
}

impl VersionStore {
    pub fn new(marker: impl Into<PathBuf>, packaged: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
            packaged: packaged.into(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.version_path(), config.packaged_version_path())
    }

    /// Marker first, then the packaged VERSION file, then `0.0.0`
    pub fn current(&self) -> String {
        for path in [&self.marker, &self.packaged] {
            match fs::read_to_string(path) {
                Ok(raw) if !raw.trim().is_empty() => return raw.trim().to_string(),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("[UPDATE] Cannot read {}: {}", path.display(), e),
            }
        }
        UNKNOWN_VERSION.to_string()
    }

    pub fn persist(&self, version: &str) -> io::Result<()> {
        let tmp = self.marker.with_extension("tmp");
        fs::write(&tmp, version.trim())?;
        fs::rename(&tmp, &self.marker)
    }
}
