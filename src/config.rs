//! Environment-driven agent configuration

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Identity file name inside the agent directory
pub const IDENTITY_FILE: &str = ".agent_identity";
/// Version marker written by the update pipeline
pub const VERSION_FILE: &str = ".agent_version";
/// Version file shipped inside packaged builds
pub const PACKAGED_VERSION_FILE: &str = "VERSION";
/// Backup root inside the agent directory
pub const BACKUP_DIR: &str = "backups";
/// Scratch directory for installers and update packages
pub const SCRATCH_DIR: &str = "temp";

/// How this installation replaces itself on update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deployment {
    /// Files live in the agent directory and are overwritten from the package
    #[default]
    InPlace,
    /// A vendor installer replaces the installation; the agent hands off and exits
    Installer,
}

impl Deployment {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in-place" | "inplace" | "source" => Some(Deployment::InPlace),
            "installer" | "packaged" | "frozen" => Some(Deployment::Installer),
            _ => None,
        }
    }
}

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the inventory API (no trailing slash)
    pub api_base_url: String,
    /// Lab this machine belongs to
    pub lab_id: u64,
    /// Service account used to authenticate
    pub email: String,
    pub password: String,
    /// Upper bound for login retry backoff
    pub poll_interval: Duration,
    /// Default log directive when RUST_LOG is unset
    pub log_level: String,
    /// Installation directory
    pub agent_dir: PathBuf,
    pub deployment: Deployment,
    /// Optional dependency reinstall command run after an in-place apply
    pub post_update_cmd: Option<String>,
    /// Staging directory readable by interactive users
    pub bridge_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".into(),
            lab_id: 1,
            email: "admin@iflab.com".into(),
            password: "password".into(),
            poll_interval: Duration::from_secs(30),
            log_level: "info".into(),
            agent_dir: default_agent_dir(),
            deployment: Deployment::InPlace,
            post_update_cmd: None,
            bridge_dir: default_bridge_dir(),
        }
    }
}

impl AgentConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("API_BASE_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = get("LAB_ID") {
            match raw.parse() {
                Ok(id) => config.lab_id = id,
                Err(_) => warn!("Invalid LAB_ID {:?}, using {}", raw, config.lab_id),
            }
        }
        if let Some(email) = get("AGENT_EMAIL") {
            config.email = email;
        }
        if let Some(password) = lookup("AGENT_PASSWORD").filter(|p| !p.is_empty()) {
            config.password = password;
        }
        if let Some(raw) = get("POLL_INTERVAL") {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => config.poll_interval = Duration::from_secs(secs),
                _ => warn!("Invalid POLL_INTERVAL {:?}, using {:?}", raw, config.poll_interval),
            }
        }
        if let Some(level) = get("LOG_LEVEL") {
            config.log_level = level.to_ascii_lowercase();
        }
        if let Some(dir) = get("AGENT_DIR") {
            config.agent_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get("AGENT_DEPLOYMENT") {
            match Deployment::parse(&raw) {
                Some(d) => config.deployment = d,
                None => warn!("Unknown AGENT_DEPLOYMENT {:?}, using {:?}", raw, config.deployment),
            }
        }
        config.post_update_cmd = get("AGENT_POST_UPDATE_CMD");
        if let Some(dir) = get("AGENT_BRIDGE_DIR") {
            config.bridge_dir = PathBuf::from(dir);
        }

        config
    }

    pub fn identity_path(&self) -> PathBuf {
        self.agent_dir.join(IDENTITY_FILE)
    }

    pub fn version_path(&self) -> PathBuf {
        self.agent_dir.join(VERSION_FILE)
    }

    pub fn packaged_version_path(&self) -> PathBuf {
        self.agent_dir.join(PACKAGED_VERSION_FILE)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.agent_dir.join(BACKUP_DIR)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.agent_dir.join(SCRATCH_DIR)
    }

    /// Scheme + authority of the API, used to resolve server-relative URLs
    pub fn api_origin(&self) -> &str {
        let base = self.api_base_url.as_str();
        let after_scheme = base.find("://").map(|i| i + 3).unwrap_or(0);
        match base[after_scheme..].find('/') {
            Some(i) => &base[..after_scheme + i],
            None => base,
        }
    }

    /// Resolve a possibly server-relative URL against the API origin
    pub fn absolute_url(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{}", self.api_origin(), url)
        } else {
            url.to_string()
        }
    }
}

/// Directory of the running executable, or the working directory
fn default_agent_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_bridge_dir() -> PathBuf {
    if cfg!(windows) {
        let base = env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".into());
        PathBuf::from(base).join("LabAgent")
    } else {
        PathBuf::from("/var/lib/lab-agent/bridge")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = AgentConfig::from_lookup(lookup(&[]));
        assert_eq!(config.api_base_url, "http://localhost:8000/api/v1");
        assert_eq!(config.lab_id, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.deployment, Deployment::InPlace);
        assert!(config.post_update_cmd.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("API_BASE_URL", "https://inventory.lab/api/v1/"),
            ("LAB_ID", "12"),
            ("POLL_INTERVAL", "15"),
            ("LOG_LEVEL", "DEBUG"),
            ("AGENT_DIR", "/opt/lab-agent"),
            ("AGENT_DEPLOYMENT", "installer"),
        ]));
        assert_eq!(config.api_base_url, "https://inventory.lab/api/v1");
        assert_eq!(config.lab_id, 12);
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.deployment, Deployment::Installer);
        assert_eq!(config.identity_path(), PathBuf::from("/opt/lab-agent/.agent_identity"));
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = AgentConfig::from_lookup(lookup(&[("LAB_ID", "abc"), ("POLL_INTERVAL", "0")]));
        assert_eq!(config.lab_id, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_relative_urls_resolve_against_origin() {
        let config = AgentConfig::from_lookup(lookup(&[("API_BASE_URL", "http://srv:8000/api/v1")]));
        assert_eq!(config.api_origin(), "http://srv:8000");
        assert_eq!(
            config.absolute_url("/storage/wall.png"),
            "http://srv:8000/storage/wall.png"
        );
        assert_eq!(config.absolute_url("https://cdn/x.png"), "https://cdn/x.png");
    }
}
