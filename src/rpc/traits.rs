//! RPC trait abstraction for the inventory service

use crate::error::RpcError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use lab_agent_shared::{
    Command, CommandStatus, MachinePayload, MachineRecord, Page, UpdateCheck,
};
use serde_json::Value;
use std::time::Duration;

/// Body of a streamed download
pub type ByteStream = BoxStream<'static, Result<Bytes, RpcError>>;

/// A download in flight
pub struct Download {
    /// Filename suggested by the server, if any
    pub filename: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// Authenticated request/response exchange with the inventory service
///
/// Every call takes the bearer token explicitly; the caller owns the session.
#[async_trait]
pub trait InventoryRpc: Send + Sync {
    /// Exchange credentials for a bearer token
    async fn authenticate(&self, email: &str, password: &str) -> Result<String, RpcError>;

    /// Exact lookup by machine identity; `Ok(None)` when the server has no record
    async fn find_machine(
        &self,
        token: &str,
        machine_id: &str,
    ) -> Result<Option<MachineRecord>, RpcError>;

    /// Free-text, paged search (pages are 1-based)
    async fn search_machines(
        &self,
        token: &str,
        query: &str,
        page: u32,
        bypass_cache: bool,
    ) -> Result<Page<MachineRecord>, RpcError>;

    /// Create a record; a duplicate identity yields `RpcError::Conflict`
    async fn create_machine(
        &self,
        token: &str,
        payload: &MachinePayload,
    ) -> Result<MachineRecord, RpcError>;

    async fn update_machine(
        &self,
        token: &str,
        server_id: u64,
        payload: &MachinePayload,
    ) -> Result<(), RpcError>;

    async fn submit_inventory(&self, token: &str, server_id: u64, report: &Value)
        -> Result<(), RpcError>;

    async fn submit_metrics(&self, token: &str, server_id: u64, snapshot: &Value)
        -> Result<(), RpcError>;

    /// Commands in `Pending` state for this machine, oldest first
    async fn pending_commands(&self, token: &str, server_id: u64) -> Result<Vec<Command>, RpcError>;

    async fn update_command_status(
        &self,
        token: &str,
        command_id: u64,
        status: CommandStatus,
        output: Option<&str>,
    ) -> Result<(), RpcError>;

    /// Ask the server whether an update applies to this version and platform
    async fn check_update(
        &self,
        token: &str,
        current_version: &str,
        platform: &str,
    ) -> Result<UpdateCheck, RpcError>;

    /// Start a streamed download of an absolute URL
    async fn download(
        &self,
        token: Option<&str>,
        url: &str,
        timeout: Duration,
    ) -> Result<Download, RpcError>;

    /// URL of an installer uploaded to the server
    fn installer_url(&self, file_id: &str) -> String;
}
