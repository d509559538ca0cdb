//! Registration of this machine with the inventory server

mod reconciler;

pub use reconciler::Reconciler;

use lab_agent_shared::LabPolicy;

/// Per-run session state passed explicitly to collaborators
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Bearer token; `None` until the next successful login
    pub token: Option<String>,
    /// Server-side record id, once resolved
    pub server_id: Option<u64>,
    /// Lab policy flags from the last successful reconcile
    pub lab_policy: LabPolicy,
}

impl Session {
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Drop the token so the next cycle re-authenticates
    pub fn expire(&mut self) {
        self.token = None;
    }
}
