//! In-memory `InventoryRpc` used by unit tests

use crate::error::RpcError;
use crate::rpc::traits::{Download, InventoryRpc};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lab_agent_shared::{
    Command, CommandStatus, LabInfo, MachinePayload, MachineRecord, Page, UpdateCheck,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

pub const FAKE_BASE: &str = "http://inventory.test/api/v1";

/// Scriptable server state
#[derive(Default)]
pub struct FakeState {
    pub records: Vec<MachineRecord>,
    pub lab: Option<LabInfo>,
    pub next_id: u64,
    /// Exact lookups answer "not found" this many more times (read-after-write lag)
    pub stale_lookups: usize,
    /// Exact lookups fail with a 500, forcing the search fallback
    pub exact_lookup_broken: bool,
    /// Search results per page
    pub page_size: usize,
    /// Record another agent creates concurrently; the next create conflicts with it
    pub racing_record: Option<MachineRecord>,
    pub creates: usize,
    pub updates: Vec<(u64, MachinePayload)>,
    pub logins: usize,
    pub login_rejected: bool,
    pub expired_tokens: HashSet<String>,
    pub pending: Vec<Command>,
    pub statuses: Vec<(u64, CommandStatus, Option<String>)>,
    pub status_updates_fail: bool,
    pub inventory: Vec<Value>,
    pub metrics: Vec<Value>,
    pub update_check: UpdateCheck,
    pub update_checks: Vec<(String, String)>,
    /// url -> (filename hint, body)
    pub downloads: HashMap<String, (Option<String>, Vec<u8>)>,
    /// Downloads whose stream breaks after the first chunk
    pub broken_downloads: HashSet<String>,
    pub download_tokens: Vec<Option<String>>,
}

pub struct FakeRpc {
    pub state: Mutex<FakeState>,
}

impl FakeRpc {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 1,
                page_size: 100,
                ..Default::default()
            }),
        }
    }

    pub fn with_state(f: impl FnOnce(&mut FakeState)) -> Self {
        let fake = Self::new();
        f(&mut fake.state.lock().unwrap());
        fake
    }

    pub fn record(id: u64, machine_id: &str) -> MachineRecord {
        MachineRecord {
            id,
            machine_id: Some(machine_id.to_string()),
            lab: None,
        }
    }

    pub fn add_download(&self, url: &str, filename: Option<&str>, body: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .downloads
            .insert(url.to_string(), (filename.map(str::to_string), body.to_vec()));
    }

    pub fn statuses_for(&self, command_id: u64) -> Vec<CommandStatus> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .iter()
            .filter(|(id, _, _)| *id == command_id)
            .map(|(_, s, _)| *s)
            .collect()
    }

    pub fn last_output(&self, command_id: u64) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .statuses
            .iter()
            .rev()
            .find(|(id, _, _)| *id == command_id)
            .and_then(|(_, _, o)| o.clone())
    }

    fn check_token(&self, token: &str) -> Result<(), RpcError> {
        if self.state.lock().unwrap().expired_tokens.contains(token) {
            return Err(RpcError::AuthExpired);
        }
        Ok(())
    }
}

fn with_lab(state: &FakeState, mut record: MachineRecord) -> MachineRecord {
    if record.lab.is_none() {
        record.lab = state.lab.clone();
    }
    record
}

#[async_trait]
impl InventoryRpc for FakeRpc {
    async fn authenticate(&self, _email: &str, _password: &str) -> Result<String, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.logins += 1;
        if state.login_rejected {
            return Err(RpcError::Status {
                status: 401,
                body: "invalid credentials".into(),
            });
        }
        Ok(format!("token-{}", state.logins))
    }

    async fn find_machine(
        &self,
        token: &str,
        machine_id: &str,
    ) -> Result<Option<MachineRecord>, RpcError> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        if state.exact_lookup_broken {
            return Err(RpcError::Status {
                status: 500,
                body: "boom".into(),
            });
        }
        if state.stale_lookups > 0 {
            state.stale_lookups -= 1;
            return Ok(None);
        }
        let found = state
            .records
            .iter()
            .find(|r| r.machine_id.as_deref() == Some(machine_id))
            .cloned();
        Ok(found.map(|r| with_lab(&state, r)))
    }

    async fn search_machines(
        &self,
        token: &str,
        query: &str,
        page: u32,
        _bypass_cache: bool,
    ) -> Result<Page<MachineRecord>, RpcError> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        if state.stale_lookups > 0 {
            state.stale_lookups -= 1;
            return Ok(Page {
                data: Vec::new(),
                last_page: 1,
            });
        }
        let hits: Vec<MachineRecord> = state
            .records
            .iter()
            .filter(|r| r.machine_id.as_deref().is_some_and(|m| m.contains(query)))
            .cloned()
            .collect();
        let size = state.page_size.max(1);
        let last_page = hits.len().div_ceil(size).max(1) as u32;
        let data = hits
            .into_iter()
            .skip((page.saturating_sub(1) as usize) * size)
            .take(size)
            .map(|r| with_lab(&state, r))
            .collect();
        Ok(Page { data, last_page })
    }

    async fn create_machine(
        &self,
        token: &str,
        payload: &MachinePayload,
    ) -> Result<MachineRecord, RpcError> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        state.creates += 1;
        if let Some(racer) = state.racing_record.take() {
            state.records.push(racer);
            return Err(RpcError::Conflict {
                field: "machine_id".into(),
                message: "The machine id has already been taken.".into(),
            });
        }
        if state
            .records
            .iter()
            .any(|r| r.machine_id.as_deref() == Some(payload.machine_id.as_str()))
        {
            return Err(RpcError::Conflict {
                field: "machine_id".into(),
                message: "The machine id has already been taken.".into(),
            });
        }
        let record = Self::record(state.next_id, &payload.machine_id);
        state.next_id += 1;
        state.records.push(record.clone());
        Ok(with_lab(&state, record))
    }

    async fn update_machine(
        &self,
        token: &str,
        server_id: u64,
        payload: &MachinePayload,
    ) -> Result<(), RpcError> {
        self.check_token(token)?;
        self.state
            .lock()
            .unwrap()
            .updates
            .push((server_id, payload.clone()));
        Ok(())
    }

    async fn submit_inventory(
        &self,
        token: &str,
        _server_id: u64,
        report: &Value,
    ) -> Result<(), RpcError> {
        self.check_token(token)?;
        self.state.lock().unwrap().inventory.push(report.clone());
        Ok(())
    }

    async fn submit_metrics(
        &self,
        token: &str,
        _server_id: u64,
        snapshot: &Value,
    ) -> Result<(), RpcError> {
        self.check_token(token)?;
        self.state.lock().unwrap().metrics.push(snapshot.clone());
        Ok(())
    }

    async fn pending_commands(&self, token: &str, _server_id: u64) -> Result<Vec<Command>, RpcError> {
        self.check_token(token)?;
        Ok(std::mem::take(&mut self.state.lock().unwrap().pending))
    }

    async fn update_command_status(
        &self,
        token: &str,
        command_id: u64,
        status: CommandStatus,
        output: Option<&str>,
    ) -> Result<(), RpcError> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        if state.status_updates_fail {
            return Err(RpcError::Transport("connection reset".into()));
        }
        state
            .statuses
            .push((command_id, status, output.map(str::to_string)));
        Ok(())
    }

    async fn check_update(
        &self,
        token: &str,
        current_version: &str,
        platform: &str,
    ) -> Result<UpdateCheck, RpcError> {
        self.check_token(token)?;
        let mut state = self.state.lock().unwrap();
        state
            .update_checks
            .push((current_version.to_string(), platform.to_string()));
        Ok(state.update_check.clone())
    }

    async fn download(
        &self,
        token: Option<&str>,
        url: &str,
        _timeout: Duration,
    ) -> Result<Download, RpcError> {
        if let Some(token) = token {
            self.check_token(token)?;
        }
        let mut state = self.state.lock().unwrap();
        state.download_tokens.push(token.map(str::to_string));
        let (filename, body) = state.downloads.get(url).cloned().ok_or(RpcError::NotFound)?;
        let content_length = Some(body.len() as u64);

        let half = body.len() / 2;
        let mut chunks: Vec<Result<Bytes, RpcError>> = vec![
            Ok(Bytes::copy_from_slice(&body[..half])),
            Ok(Bytes::copy_from_slice(&body[half..])),
        ];
        if state.broken_downloads.contains(url) {
            chunks[1] = Err(RpcError::Transport("connection closed mid-body".into()));
        }
        Ok(Download {
            filename,
            content_length,
            body: futures::stream::iter(chunks).boxed(),
        })
    }

    fn installer_url(&self, file_id: &str) -> String {
        format!("{FAKE_BASE}/installers/{file_id}/download")
    }
}
