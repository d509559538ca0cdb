//! File acquisition - fetches remote or network payloads into a local drop directory

use crate::error::AgentError;
use crate::platform::SystemActions;
use crate::rpc::InventoryRpc;
use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use lab_agent_shared::now_ms;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Probe file used to verify a directory is writable
const PROBE_FILE: &str = ".write_test";

/// Where a delivered file comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Uploaded to the inventory server, fetched over HTTP
    Upload,
    /// A link the admin pasted; HTTP(S) URLs are downloaded, paths copied
    Link,
    /// Local or UNC path
    NetworkPath,
}

impl SourceKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "upload" => Some(SourceKind::Upload),
            "link" => Some(SourceKind::Link),
            "network_path" | "network" => Some(SourceKind::NetworkPath),
            _ => None,
        }
    }
}

pub fn is_http_url(raw: &str) -> bool {
    let lower = raw.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Keep alphanumerics and `._- `, trimmed
///
/// Returns `None` when nothing usable is left (including names made of dots only).
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.trim_matches('.').is_empty() {
        return None;
    }
    Some(cleaned.to_string())
}

/// Last path segment of a URL or path, ignoring any query string
pub fn basename(reference: &str) -> Option<&str> {
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    without_query
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
}

/// Create `dir` and verify a file can be written and removed in it
pub fn probe_writable(dir: &Path) -> bool {
    let probe = dir.join(PROBE_FILE);
    let result = fs::create_dir_all(dir)
        .and_then(|_| fs::write(&probe, b""))
        .and_then(|_| fs::remove_file(&probe));
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("[ACQUIRE] Cannot write to {}: {}", dir.display(), e);
            false
        }
    }
}

/// Fetches payloads to local files
pub struct FileAcquirer {
    rpc: Arc<dyn InventoryRpc>,
    system: Arc<dyn SystemActions>,
}

impl FileAcquirer {
    pub fn new(rpc: Arc<dyn InventoryRpc>, system: Arc<dyn SystemActions>) -> Self {
        Self { rpc, system }
    }

    /// First writable user-visible drop directory, else the scratch one
    pub fn resolve_destination(&self) -> Result<PathBuf, AgentError> {
        for dir in self.system.delivery_dirs() {
            if probe_writable(&dir) {
                return Ok(dir);
            }
        }
        let fallback = self.system.fallback_delivery_dir();
        fs::create_dir_all(&fallback).map_err(|e| {
            AgentError::FatalLocal(format!("cannot create {}: {}", fallback.display(), e))
        })?;
        info!("[ACQUIRE] Using fallback directory {}", fallback.display());
        Ok(fallback)
    }

    /// Stream `url` into `dest_dir`
    ///
    /// The file name is `name` if given, else the server's hint, else the URL
    /// basename, else a timestamped default. A partial file is removed on failure.
    pub async fn download(
        &self,
        token: Option<&str>,
        url: &str,
        dest_dir: &Path,
        name: Option<&str>,
        limit: Duration,
    ) -> Result<PathBuf> {
        let download = self
            .rpc
            .download(token, url, limit)
            .await
            .with_context(|| format!("downloading {url}"))?;

        let filename = name
            .and_then(sanitize_filename)
            .or_else(|| download.filename.as_deref().and_then(sanitize_filename))
            .or_else(|| basename(url).and_then(sanitize_filename))
            .unwrap_or_else(|| format!("file_{}.dat", now_ms() / 1000));
        let path = dest_dir.join(filename);

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("creating {}", dest_dir.display()))?;
        match write_stream(&path, download.body).await {
            Ok(written) => {
                info!("[ACQUIRE] Downloaded {} bytes to {}", written, path.display());
                Ok(path)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    /// Copy a local or network file into `dest_dir`
    pub async fn copy(&self, source: &Path, dest_dir: &Path, name: Option<&str>) -> Result<PathBuf> {
        if !source.is_file() {
            bail!("source file not found: {}", source.display());
        }
        let filename = name
            .and_then(sanitize_filename)
            .or_else(|| {
                source
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(sanitize_filename)
            })
            .ok_or_else(|| anyhow!("cannot derive a file name from {}", source.display()))?;
        let path = dest_dir.join(filename);

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("creating {}", dest_dir.display()))?;
        let copied = tokio::fs::copy(source, &path)
            .await
            .with_context(|| format!("copying {}", source.display()))?;
        info!("[ACQUIRE] Copied {} bytes to {}", copied, path.display());
        Ok(path)
    }

    /// Tell the user a file arrived; never fails the delivery
    pub async fn notify_placed(&self, path: &Path) {
        let dir = path.parent().unwrap_or(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let body = format!("File received: {}\nLocation: {}", name, dir.display());
        if let Err(e) = self.system.notify("Lab", &body).await {
            debug!("[ACQUIRE] Notification skipped: {}", e);
        }
    }
}

/// Unpack a zip archive into `dest`, refusing entries that escape it
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive).with_context(|| format!("opening {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a valid zip archive", archive.display()))?;
    fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    zip.extract(dest)
        .with_context(|| format!("extracting {}", archive.display()))?;
    Ok(())
}

async fn write_stream(path: &Path, mut body: crate::rpc::ByteStream) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("download interrupted")?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
