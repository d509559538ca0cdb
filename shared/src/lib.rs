//! Lab Agent Shared Protocol Types
//!
//! This crate provides the wire types exchanged with the inventory server,
//! the command status lifecycle, and the Wake-on-LAN codec used by the
//! endpoint agent.

pub mod codec;
pub mod protocol;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use protocol::*;
pub use state_machine::{CommandLifecycle, LifecycleEvent, TransitionError};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Timing bounds for the agent loop, handlers and network calls
pub mod limits {
    /// Sleep between loop iterations
    pub const LOOP_SLEEP_MS: u64 = 5_000;

    /// Delay before retrying a failed login
    pub const LOGIN_RETRY_MS: u64 = 10_000;

    /// Metrics snapshot cadence
    pub const METRICS_INTERVAL_MS: u64 = 30_000;

    /// Detailed inventory report cadence
    pub const INVENTORY_INTERVAL_MS: u64 = 300_000;

    /// Lab wallpaper enforcement cadence
    pub const WALLPAPER_INTERVAL_MS: u64 = 300_000;

    /// First delay after a create conflict, before re-lookup
    pub const CONFLICT_RETRY_DELAY_MS: u64 = 500;

    /// Second (final) delay after a create conflict
    pub const CONFLICT_SECOND_DELAY_MS: u64 = 1_000;

    /// Timeout for plain API requests
    pub const API_TIMEOUT_MS: u64 = 10_000;

    /// Timeout for installer and update downloads
    pub const DOWNLOAD_TIMEOUT_MS: u64 = 300_000;

    /// Timeout for user-facing file deliveries
    pub const FILE_TRANSFER_TIMEOUT_MS: u64 = 600_000;

    /// Hard bound for ad-hoc shell commands
    pub const SHELL_TIMEOUT_MS: u64 = 30_000;

    /// Hard bound for installer execution
    pub const INSTALL_TIMEOUT_MS: u64 = 600_000;

    /// Hard bound for the post-update dependency reinstall step
    pub const POST_UPDATE_TIMEOUT_MS: u64 = 300_000;

    /// Grace period between a polite terminate and a force kill
    pub const KILL_GRACE_MS: u64 = 3_000;

    /// Bound for short OS helper invocations (lock, notify, rename)
    pub const OS_HELPER_TIMEOUT_MS: u64 = 25_000;

    /// Number of processes returned by a process listing
    pub const PROCESS_LIST_LIMIT: usize = 100;
}

impl Command {
    /// Fetch a string parameter, trimming surrounding whitespace
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.str(key)
    }
}
