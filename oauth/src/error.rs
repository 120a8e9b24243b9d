use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable token exists; the caller must drive a login against `issuer`.
    #[error("authentication required for `{endpoint}` (issuer: {issuer})")]
    Required { endpoint: String, issuer: String },

    #[error("stored token for `{endpoint}` is expired and could not be refreshed")]
    Expired { endpoint: String },

    #[error("authentication failed: {reason}")]
    Failed { reason: String },

    #[error("OAuth callback port {0} is already in use")]
    CallbackPortInUse(u16),

    #[error("timed out waiting for the OAuth callback")]
    CallbackTimeout,

    #[error("authorization state mismatch in OAuth callback")]
    StateMismatch,

    #[error("issuer discovery failed for `{issuer}`: {reason}")]
    Discovery { issuer: String, reason: String },

    /// Terminal rejection from the token endpoint. `error_description` is
    /// preserved verbatim when the server sent one.
    #[error("token endpoint rejected the request: {error}")]
    Rejected {
        error: String,
        error_description: Option<String>,
    },

    #[error("invalid endpoint URL `{0}`")]
    InvalidEndpoint(String),

    #[error("token store error: {0}")]
    Storage(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AuthError {
    /// Network-level failures are transient; the caller decides whether to
    /// retry. Everything else is terminal for the current attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Http(err) => !err.is_status(),
            AuthError::Io(_) | AuthError::CallbackTimeout => true,
            _ => false,
        }
    }
}
