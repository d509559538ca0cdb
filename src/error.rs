//! Error taxonomy for the agent
//!
//! `RpcError` is what the transport reports; `AgentError` is how the loop
//! reacts to it. No variant is allowed to end the main loop.

use thiserror::Error;

/// Errors reported by the inventory RPC client
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection, DNS, TLS or timeout failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Token missing, expired or rejected (HTTP 401)
    #[error("authentication expired or rejected")]
    AuthExpired,

    #[error("resource not found")]
    NotFound,

    /// Structured validation failure naming the offending field (HTTP 422)
    #[error("validation conflict on field `{field}`: {message}")]
    Conflict { field: String, message: String },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RpcError::Decode(err.to_string())
        } else if err.status().map(|s| s.as_u16()) == Some(401) {
            RpcError::AuthExpired
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

/// How the agent classifies a failure
#[derive(Debug, Error)]
pub enum AgentError {
    /// Retry next cycle, no state change
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Clear the token and re-authenticate next cycle
    #[error("authentication expired")]
    AuthExpired,

    /// Create/lookup race not resolved within the bounded retry
    #[error("validation conflict: {0}")]
    ValidationConflict(String),

    /// A command handler failed; reported as `Failed`
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// Self-update aborted; backup retained and version unchanged
    #[error("update aborted during {stage}: {reason}")]
    PipelineAbort { stage: &'static str, reason: String },

    /// Local persistence or directory creation failed
    #[error("local error: {0}")]
    FatalLocal(String),
}

impl From<RpcError> for AgentError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::AuthExpired => AgentError::AuthExpired,
            RpcError::Conflict { field, message } => {
                AgentError::ValidationConflict(format!("{field}: {message}"))
            }
            other => AgentError::TransientNetwork(other.to_string()),
        }
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::FatalLocal(err.to_string())
    }
}

impl AgentError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, AgentError::AuthExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_errors_classify() {
        assert!(AgentError::from(RpcError::AuthExpired).is_auth_expired());
        assert!(matches!(
            AgentError::from(RpcError::Conflict {
                field: "machine_id".into(),
                message: "taken".into()
            }),
            AgentError::ValidationConflict(_)
        ));
        assert!(matches!(
            AgentError::from(RpcError::Status {
                status: 500,
                body: String::new()
            }),
            AgentError::TransientNetwork(_)
        ));
    }

    #[test]
    fn test_abort_message_names_stage() {
        let err = AgentError::PipelineAbort {
            stage: "apply",
            reason: "disk full".into(),
        };
        assert_eq!(err.to_string(), "update aborted during apply: disk full");
    }
}
