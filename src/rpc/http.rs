//! HTTP implementation of the inventory RPC over reqwest

use crate::error::RpcError;
use crate::rpc::traits::{Download, InventoryRpc};
use async_trait::async_trait;
use futures::StreamExt;
use lab_agent_shared::{
    limits, Command, CommandStatus, LoginRequest, LoginResponse, MachinePayload, MachineRecord,
    Page, StatusUpdate, UpdateCheck, ValidationErrorBody,
};
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

/// JSON/REST client for the inventory API
pub struct HttpRpcClient {
    http: Client,
    base_url: String,
}

impl HttpRpcClient {
    pub fn new(base_url: &str) -> Result<Self, RpcError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_millis(limits::API_TIMEOUT_MS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn api(&self, req: RequestBuilder, token: &str) -> RequestBuilder {
        req.bearer_auth(token)
            .header(ACCEPT, "application/json")
            .timeout(Duration::from_millis(limits::API_TIMEOUT_MS))
    }

    /// Send and map non-success statuses onto `RpcError`
    async fn send(&self, req: RequestBuilder) -> Result<Response, RpcError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(error_for(status, resp).await)
    }
}

async fn error_for(status: StatusCode, resp: Response) -> RpcError {
    match status {
        StatusCode::UNAUTHORIZED => RpcError::AuthExpired,
        StatusCode::NOT_FOUND => RpcError::NotFound,
        StatusCode::UNPROCESSABLE_ENTITY => {
            let body = resp.text().await.unwrap_or_default();
            match serde_json::from_str::<ValidationErrorBody>(&body) {
                Ok(parsed) if !parsed.errors.is_empty() => {
                    // Prefer the identity field when several are named
                    let field = if parsed.names_field("machine_id") {
                        "machine_id".to_string()
                    } else {
                        parsed.errors.keys().next().cloned().unwrap_or_default()
                    };
                    RpcError::Conflict {
                        field,
                        message: parsed.message.unwrap_or_default(),
                    }
                }
                _ => RpcError::Status {
                    status: status.as_u16(),
                    body,
                },
            }
        }
        other => RpcError::Status {
            status: other.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        },
    }
}

async fn json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, RpcError> {
    resp.json::<T>()
        .await
        .map_err(|e| RpcError::Decode(e.to_string()))
}

/// Extract a filename from a Content-Disposition header value
pub fn filename_from_disposition(value: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r#"filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).ok())
        .as_ref()?;
    re.captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

#[async_trait]
impl InventoryRpc for HttpRpcClient {
    async fn authenticate(&self, email: &str, password: &str) -> Result<String, RpcError> {
        let req = self
            .http
            .post(self.url("/login"))
            .header(ACCEPT, "application/json")
            .timeout(Duration::from_millis(limits::API_TIMEOUT_MS))
            .json(&LoginRequest { email, password });
        let body: LoginResponse = json(self.send(req).await?).await?;
        body.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RpcError::Decode("login response carried no token".into()))
    }

    async fn find_machine(
        &self,
        token: &str,
        machine_id: &str,
    ) -> Result<Option<MachineRecord>, RpcError> {
        let url = self.url(&format!("/computers/by-machine-id/{machine_id}"));
        match self.send(self.api(self.http.get(url), token)).await {
            Ok(resp) => Ok(Some(json(resp).await?)),
            Err(RpcError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn search_machines(
        &self,
        token: &str,
        query: &str,
        page: u32,
        bypass_cache: bool,
    ) -> Result<Page<MachineRecord>, RpcError> {
        let mut params: Vec<(&str, String)> = vec![
            ("search", query.to_string()),
            ("per_page", "100".into()),
            ("page", page.to_string()),
        ];
        if bypass_cache {
            params.push(("_bypass_cache", "true".into()));
            params.push(("_t", (lab_agent_shared::now_ms() / 1000).to_string()));
        }
        let req = self.api(self.http.get(self.url("/computers")), token).query(&params);
        json(self.send(req).await?).await
    }

    async fn create_machine(
        &self,
        token: &str,
        payload: &MachinePayload,
    ) -> Result<MachineRecord, RpcError> {
        let req = self.api(self.http.post(self.url("/computers")), token).json(payload);
        json(self.send(req).await?).await
    }

    async fn update_machine(
        &self,
        token: &str,
        server_id: u64,
        payload: &MachinePayload,
    ) -> Result<(), RpcError> {
        let url = self.url(&format!("/computers/{server_id}"));
        self.send(self.api(self.http.put(url), token).json(payload))
            .await
            .map(|_| ())
    }

    async fn submit_inventory(
        &self,
        token: &str,
        server_id: u64,
        report: &Value,
    ) -> Result<(), RpcError> {
        let url = self.url(&format!("/computers/{server_id}/report"));
        self.send(self.api(self.http.post(url), token).json(report))
            .await
            .map(|_| ())
    }

    async fn submit_metrics(
        &self,
        token: &str,
        server_id: u64,
        snapshot: &Value,
    ) -> Result<(), RpcError> {
        let url = self.url(&format!("/computers/{server_id}/metrics"));
        self.send(self.api(self.http.post(url), token).json(snapshot))
            .await
            .map(|_| ())
    }

    async fn pending_commands(&self, token: &str, server_id: u64) -> Result<Vec<Command>, RpcError> {
        let url = self.url(&format!("/computers/{server_id}/commands/pending"));
        match self.send(self.api(self.http.get(url), token)).await {
            Ok(resp) => json(resp).await,
            // Older servers without the route
            Err(RpcError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn update_command_status(
        &self,
        token: &str,
        command_id: u64,
        status: CommandStatus,
        output: Option<&str>,
    ) -> Result<(), RpcError> {
        let url = self.url(&format!("/commands/{command_id}/status"));
        let body = StatusUpdate {
            status,
            output: output.filter(|o| !o.is_empty()).map(str::to_string),
        };
        self.send(self.api(self.http.put(url), token).json(&body))
            .await
            .map(|_| ())
    }

    async fn check_update(
        &self,
        token: &str,
        current_version: &str,
        platform: &str,
    ) -> Result<UpdateCheck, RpcError> {
        let req = self
            .api(self.http.get(self.url("/agent/check-update")), token)
            .query(&[("current_version", current_version), ("platform", platform)]);
        json(self.send(req).await?).await
    }

    async fn download(
        &self,
        token: Option<&str>,
        url: &str,
        timeout: Duration,
    ) -> Result<Download, RpcError> {
        let mut req = self.http.get(url).timeout(timeout);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = self.send(req).await?;
        let filename = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        let content_length = resp.content_length();
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(RpcError::from))
            .boxed();
        Ok(Download {
            filename,
            content_length,
            body,
        })
    }

    fn installer_url(&self, file_id: &str) -> String {
        self.url(&format!("/installers/{file_id}/download"))
    }
}
