use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamClientError {
    #[error("MCP client not initialized")]
    NotInitialized,

    #[error("MCP client already initialized")]
    AlreadyInitialized,

    #[error("timed out handshaking with the MCP server after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("handshaking with the MCP server failed: {0}")]
    Handshake(String),

    /// The upstream answered 401: the gateway (or the session) must obtain a
    /// fresh grant before retrying. Carried as a typed kind so callers never
    /// string-match.
    #[error("upstream requires OAuth authorization")]
    AuthorizationRequired,

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} was cancelled (reason: {reason:?})")]
    Cancelled {
        operation: &'static str,
        reason: Option<String>,
    },

    /// The upstream returned an MCP-level error for this call. Terminal for
    /// the call, not for the connection.
    #[error("upstream returned an error: {0}")]
    Mcp(rmcp::model::ErrorData),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("tool arguments must be a JSON object, got {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UpstreamClientError {
    /// Classifies an rmcp service error, pulling 401s out of the transport
    /// error chain into the typed `AuthorizationRequired` kind.
    pub(crate) fn from_service_error(
        operation: &'static str,
        err: rmcp::ServiceError,
    ) -> Self {
        match err {
            rmcp::ServiceError::McpError(data) => {
                if is_unauthorized_code(data.code.0) {
                    UpstreamClientError::AuthorizationRequired
                } else {
                    UpstreamClientError::Mcp(data)
                }
            }
            rmcp::ServiceError::Timeout { timeout } => UpstreamClientError::Timeout {
                operation,
                timeout,
            },
            rmcp::ServiceError::Cancelled { reason } => UpstreamClientError::Cancelled {
                operation,
                reason,
            },
            other => {
                if error_chain_has_unauthorized(&other) {
                    UpstreamClientError::AuthorizationRequired
                } else {
                    UpstreamClientError::Transport(other.to_string())
                }
            }
        }
    }

    pub fn is_auth_required(&self) -> bool {
        matches!(self, UpstreamClientError::AuthorizationRequired)
    }
}

fn is_unauthorized_code(code: i32) -> bool {
    // Servers proxying HTTP auth failures surface the status as the JSON-RPC
    // error code.
    code == 401 || code == -32001
}

fn error_chain_has_unauthorized(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>()
            && reqwest_err.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
        {
            return true;
        }
        // Transport wrappers that embed the status line rather than the
        // source error.
        if err.to_string().contains("401 Unauthorized") {
            return true;
        }
        current = err.source();
    }
    false
}
