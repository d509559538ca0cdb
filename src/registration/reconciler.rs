//! Registration reconciler - maps the local identity to exactly one server record

use super::Session;
use crate::error::{AgentError, RpcError};
use crate::identity::MachineIdentity;
use crate::rpc::InventoryRpc;
use lab_agent_shared::{limits, LabPolicy, MachinePayload, MachineRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delays applied after a create conflict, before each re-lookup
#[derive(Debug, Clone, Copy)]
pub struct ConflictBackoff {
    pub first: Duration,
    pub second: Duration,
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(limits::CONFLICT_RETRY_DELAY_MS),
            second: Duration::from_millis(limits::CONFLICT_SECOND_DELAY_MS),
        }
    }
}

/// Keeps the local identity and the server record in agreement
pub struct Reconciler {
    rpc: Arc<dyn InventoryRpc>,
    identity: MachineIdentity,
    lab_id: u64,
    backoff: ConflictBackoff,
}

impl Reconciler {
    pub fn new(rpc: Arc<dyn InventoryRpc>, identity: MachineIdentity, lab_id: u64) -> Self {
        Self {
            rpc,
            identity,
            lab_id,
            backoff: ConflictBackoff::default(),
        }
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: ConflictBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn identity(&self) -> &MachineIdentity {
        &self.identity
    }

    /// Run one reconcile cycle and return the resolved server id
    ///
    /// Never fails: auth expiry clears the session token, anything else is
    /// logged and leaves the session as it was.
    pub async fn reconcile(
        &self,
        session: &mut Session,
        hostname: &str,
        agent_version: &str,
    ) -> Option<u64> {
        let Some(token) = session.token.clone() else {
            return session.server_id;
        };
        let payload = MachinePayload {
            lab_id: self.lab_id,
            machine_id: self.identity.to_string(),
            hostname: hostname.to_string(),
            agent_version: agent_version.to_string(),
        };

        let record = match self.resolve(&token, &payload).await {
            Ok(record) => record,
            Err(AgentError::AuthExpired) => {
                warn!("[REG] Token rejected, re-authenticating next cycle");
                session.expire();
                return session.server_id;
            }
            Err(e) => {
                warn!("[REG] Registration skipped this cycle: {}", e);
                return session.server_id;
            }
        };

        if session.server_id != Some(record.id) {
            info!("[REG] Machine {} registered as #{}", self.identity, record.id);
        }
        session.server_id = Some(record.id);
        session.lab_policy = LabPolicy::from_record(&record);

        match self.rpc.update_machine(&token, record.id, &payload).await {
            Ok(()) => debug!("[REG] Machine #{} attributes refreshed", record.id),
            Err(RpcError::AuthExpired) => session.expire(),
            Err(e) => warn!("[REG] Failed to update machine #{}: {}", record.id, e),
        }

        session.server_id
    }

    /// Lookup, then create on a miss, recovering from a create race
    async fn resolve(
        &self,
        token: &str,
        payload: &MachinePayload,
    ) -> Result<MachineRecord, AgentError> {
        if let Some(record) = self.lookup(token, false).await? {
            return Ok(record);
        }

        match self.rpc.create_machine(token, payload).await {
            Ok(record) => Ok(record),
            Err(RpcError::Conflict { field, .. }) if field == "machine_id" => {
                info!("[REG] Identity already registered, re-checking");
                self.recover_conflict(token).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bounded re-lookup after a conflict; never creates again
    async fn recover_conflict(&self, token: &str) -> Result<MachineRecord, AgentError> {
        for delay in [self.backoff.first, self.backoff.second] {
            tokio::time::sleep(delay).await;
            if let Some(record) = self.lookup(token, true).await? {
                return Ok(record);
            }
        }
        Err(AgentError::ValidationConflict(format!(
            "machine {} reported as duplicate but not found",
            self.identity
        )))
    }

    /// Exact lookup, falling back to a full paged search when that endpoint fails
    async fn lookup(
        &self,
        token: &str,
        bypass_cache: bool,
    ) -> Result<Option<MachineRecord>, AgentError> {
        match self.rpc.find_machine(token, self.identity.as_str()).await {
            Ok(found) => Ok(found),
            Err(RpcError::AuthExpired) => Err(AgentError::AuthExpired),
            Err(e) => {
                debug!("[REG] Exact lookup failed ({}), searching", e);
                self.search(token, bypass_cache).await
            }
        }
    }

    async fn search(
        &self,
        token: &str,
        bypass_cache: bool,
    ) -> Result<Option<MachineRecord>, AgentError> {
        let wanted = self.identity.as_str();
        let mut page = 1;
        loop {
            let result = self
                .rpc
                .search_machines(token, wanted, page, bypass_cache)
                .await?;
            if let Some(hit) = result
                .data
                .into_iter()
                .find(|r| r.machine_id.as_deref() == Some(wanted))
            {
                return Ok(Some(hit));
            }
            if page >= result.last_page {
                return Ok(None);
            }
            page += 1;
        }
    }
}
