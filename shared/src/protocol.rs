//! Wire types exchanged with the inventory server
//!
//! All payloads are JSON. Field names follow the server's REST resources.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Status of a remote command as tracked by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Processing => "processing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
        }
    }

    /// Completed and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form, string-keyed command parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandParams(pub Map<String, Value>);

impl CommandParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for tests and fakes
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Trimmed, non-empty string value
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First present string among several aliases
    pub fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter().find_map(|k| self.str(k))
    }

    /// Boolean value, tolerating "true"/"1" strings and numbers
    pub fn bool(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Unsigned integer value, tolerating numeric strings
    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<CommandParams, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(CommandParams(raw.unwrap_or_default()))
}

/// A server-issued instruction for this machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,
    #[serde(rename = "command")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parameters: CommandParams,
    #[serde(default)]
    pub status: CommandStatus,
}

impl Command {
    pub fn new(id: u64, kind: impl Into<String>, parameters: CommandParams) -> Self {
        Self {
            id,
            kind: kind.into(),
            parameters,
            status: CommandStatus::Pending,
        }
    }
}

/// Body of `PUT /commands/{id}/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Lab attributes embedded in a machine record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabInfo {
    #[serde(default)]
    pub default_wallpaper_url: Option<String>,
    #[serde(default)]
    pub default_wallpaper_enabled: Option<bool>,
}

/// Server-side machine record (only the fields the agent relies on)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineRecord {
    pub id: u64,
    #[serde(default)]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub lab: Option<LabInfo>,
}

/// Lab-level policy flags cached from the last reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabPolicy {
    pub wallpaper_url: Option<String>,
    pub wallpaper_enabled: bool,
}

impl Default for LabPolicy {
    fn default() -> Self {
        Self {
            wallpaper_url: None,
            wallpaper_enabled: true,
        }
    }
}

impl LabPolicy {
    pub fn from_record(record: &MachineRecord) -> Self {
        let lab = record.lab.clone().unwrap_or_default();
        Self {
            wallpaper_url: lab
                .default_wallpaper_url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            wallpaper_enabled: lab.default_wallpaper_enabled.unwrap_or(true),
        }
    }
}

/// Registration/update body sent for this machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachinePayload {
    pub lab_id: u64,
    pub machine_id: String,
    pub hostname: String,
    pub agent_version: String,
}

/// One page of a paged listing
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default = "first_page")]
    pub last_page: u32,
}

fn first_page() -> u32 {
    1
}

/// Structured 422 body returned on validation failures
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationErrorBody {
    pub fn names_field(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub token: Option<String>,
}

/// Response of `GET /agent/check-update`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateCheck {
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub latest_version: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// An update the server says is applicable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePackage {
    pub target_version: String,
    pub download_ref: String,
}

impl UpdateCheck {
    /// `version` wins over the older `latest_version` key
    pub fn target_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or(self.latest_version.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// The package to fetch, if an update is available and downloadable
    pub fn package(&self) -> Option<UpdatePackage> {
        if !self.available {
            return None;
        }
        let download_ref = self.download_url.as_deref()?.trim();
        if download_ref.is_empty() {
            return None;
        }
        Some(UpdatePackage {
            target_version: self.target_version().unwrap_or("unknown").to_string(),
            download_ref: download_ref.to_string(),
        })
    }
}

/// One row of a process listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub create_time: u64,
}
