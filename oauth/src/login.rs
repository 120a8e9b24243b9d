//! Interactive PKCE authorization-code flow with a loopback callback
//! listener. The browser is decoupled: launch failure just prints the URL,
//! and the flow only completes when the callback arrives or the deadline
//! passes.

use std::sync::Arc;
use std::time::Duration;

use tiny_http::Response;
use tiny_http::Server;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::warn;
use url::Url;
use urlencoding::decode;

use crate::client::OAuthClient;
use crate::discovery::IssuerMetadata;
use crate::error::AuthError;
use crate::pkce::generate_pkce;
use crate::pkce::random_state;
use crate::store::TokenStore;
use crate::tokens::StoredToken;

pub const DEFAULT_CALLBACK_PORT: u16 = 3000;
const CALLBACK_PATH: &str = "/callback";
const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct LoginOptions {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub callback_port: u16,
    pub timeout: Duration,
    /// When false the URL is only printed, never opened. Tests and headless
    /// hosts drive the callback themselves.
    pub open_browser: bool,
}

impl Default for LoginOptions {
    fn default() -> Self {
        Self {
            client_id: "muster".to_string(),
            scopes: Vec::new(),
            callback_port: DEFAULT_CALLBACK_PORT,
            timeout: DEFAULT_LOGIN_TIMEOUT,
            open_browser: true,
        }
    }
}

/// A login in flight. The authorization URL is available immediately;
/// `wait()` resolves once the callback has been exchanged and the token
/// stored.
pub struct LoginHandle {
    authorization_url: String,
    completion: oneshot::Receiver<Result<StoredToken, AuthError>>,
}

impl LoginHandle {
    pub fn authorization_url(&self) -> &str {
        &self.authorization_url
    }

    pub async fn wait(self) -> Result<StoredToken, AuthError> {
        self.completion.await.map_err(|_| AuthError::Failed {
            reason: "login task was cancelled".to_string(),
        })?
    }
}

struct CallbackServerGuard {
    server: Arc<Server>,
}

impl Drop for CallbackServerGuard {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

/// Binds the loopback listener, spawns the flow, and returns a handle.
/// Binding failure on a busy port is the distinct `CallbackPortInUse` kind.
pub fn begin_login(
    http: reqwest::Client,
    store: Arc<TokenStore>,
    endpoint: &str,
    metadata: &IssuerMetadata,
    options: LoginOptions,
) -> Result<LoginHandle, AuthError> {
    let port = options.callback_port;
    let server = Server::http(format!("127.0.0.1:{port}")).map_err(|err| {
        match err.downcast::<std::io::Error>() {
            Ok(io_err) if io_err.kind() == std::io::ErrorKind::AddrInUse => {
                AuthError::CallbackPortInUse(port)
            }
            Ok(io_err) => AuthError::Io(*io_err),
            Err(other) => AuthError::Failed {
                reason: format!("failed to bind OAuth callback listener: {other}"),
            },
        }
    })?;
    let server = Arc::new(server);
    let guard = CallbackServerGuard {
        server: Arc::clone(&server),
    };

    let redirect_uri = format!("http://127.0.0.1:{port}{CALLBACK_PATH}");
    let pkce = generate_pkce();
    let state = random_state();

    let mut auth_url =
        Url::parse(&metadata.authorization_endpoint).map_err(|_| AuthError::Discovery {
            issuer: metadata.issuer.clone(),
            reason: format!(
                "invalid authorization_endpoint `{}`",
                metadata.authorization_endpoint
            ),
        })?;
    {
        let mut query = auth_url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &options.client_id)
            .append_pair("redirect_uri", &redirect_uri)
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        if !options.scopes.is_empty() {
            query.append_pair("scope", &options.scopes.join(" "));
        }
    }

    let (callback_tx, callback_rx) = oneshot::channel();
    spawn_callback_listener(server, callback_tx);

    let (done_tx, done_rx) = oneshot::channel();
    let authorization_url = auth_url.to_string();
    let flow = LoginFlow {
        http,
        store,
        endpoint: endpoint.to_string(),
        issuer_url: metadata.issuer.clone(),
        token_endpoint: metadata.token_endpoint.clone(),
        redirect_uri,
        verifier: pkce.verifier,
        state,
        options,
        callback_rx,
        _guard: guard,
    };
    let url_for_task = authorization_url.clone();
    tokio::spawn(async move {
        let result = flow.run(&url_for_task).await;
        let _ = done_tx.send(result);
    });

    Ok(LoginHandle {
        authorization_url,
        completion: done_rx,
    })
}

struct LoginFlow {
    http: reqwest::Client,
    store: Arc<TokenStore>,
    endpoint: String,
    issuer_url: String,
    token_endpoint: String,
    redirect_uri: String,
    verifier: String,
    state: String,
    options: LoginOptions,
    callback_rx: oneshot::Receiver<CallbackOutcome>,
    _guard: CallbackServerGuard,
}

impl LoginFlow {
    async fn run(self, authorization_url: &str) -> Result<StoredToken, AuthError> {
        if self.options.open_browser && webbrowser::open(authorization_url).is_err() {
            warn!("browser launch failed; authorize manually at {authorization_url}");
        }

        let outcome = timeout(self.options.timeout, self.callback_rx)
            .await
            .map_err(|_| AuthError::CallbackTimeout)?
            .map_err(|_| AuthError::Failed {
                reason: "OAuth callback listener stopped".to_string(),
            })?;

        let (code, state) = match outcome {
            CallbackOutcome::Success { code, state } => (code, state),
            CallbackOutcome::Error(description) => {
                return Err(AuthError::Failed {
                    reason: format!("authorization server reported: {description}"),
                });
            }
        };
        if state != self.state {
            return Err(AuthError::StateMismatch);
        }

        let scopes = if self.options.scopes.is_empty() {
            None
        } else {
            Some(self.options.scopes.clone())
        };
        let client = OAuthClient::new(self.http.clone(), self.options.client_id.clone());
        let token = client
            .exchange_code(
                &self.token_endpoint,
                &self.issuer_url,
                &self.endpoint,
                &code,
                &self.verifier,
                &self.redirect_uri,
                scopes,
            )
            .await?;

        self.store.put(&self.endpoint, &token)?;
        Ok(token)
    }
}

enum CallbackOutcome {
    Success { code: String, state: String },
    Error(String),
}

fn spawn_callback_listener(server: Arc<Server>, tx: oneshot::Sender<CallbackOutcome>) {
    tokio::task::spawn_blocking(move || {
        let mut tx = Some(tx);
        while let Ok(request) = server.recv() {
            match parse_callback(request.url()) {
                Some(outcome @ CallbackOutcome::Success { .. }) => {
                    let response = Response::from_string(
                        "Authentication complete. You may close this window.",
                    );
                    if let Err(err) = request.respond(response) {
                        warn!("failed to respond to OAuth callback: {err}");
                    }
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(outcome);
                    }
                    break;
                }
                Some(outcome @ CallbackOutcome::Error(_)) => {
                    let response =
                        Response::from_string("Authorization failed.").with_status_code(400);
                    if let Err(err) = request.respond(response) {
                        warn!("failed to respond to OAuth callback: {err}");
                    }
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(outcome);
                    }
                    break;
                }
                None => {
                    let response =
                        Response::from_string("Invalid OAuth callback").with_status_code(404);
                    if let Err(err) = request.respond(response) {
                        warn!("failed to respond to OAuth callback: {err}");
                    }
                }
            }
        }
    });
}

fn parse_callback(path_and_query: &str) -> Option<CallbackOutcome> {
    let (route, query) = path_and_query.split_once('?')?;
    if route != CALLBACK_PATH {
        return None;
    }

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let Ok(value) = decode(value) else {
            continue;
        };
        let value = value.into_owned();
        match key {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            "error_description" => error_description = Some(value),
            _ => {}
        }
    }

    if let (Some(code), Some(state)) = (code, state) {
        return Some(CallbackOutcome::Success { code, state });
    }
    // RFC 6749 makes `error` mandatory on failure and `error_description`
    // optional; accept either so a bare denial still ends the flow.
    error_description.or(error).map(CallbackOutcome::Error)
}

#[cfg(test)]
mod tests {
    use super::CallbackOutcome;
    use super::parse_callback;

    #[test]
    fn parses_code_and_state() {
        match parse_callback("/callback?code=abc&state=xyz") {
            Some(CallbackOutcome::Success { code, state }) => {
                assert_eq!(code, "abc");
                assert_eq!(state, "xyz");
            }
            _ => panic!("expected success outcome"),
        }
    }

    #[test]
    fn decodes_percent_encoding() {
        match parse_callback("/callback?code=a%2Bb&state=s") {
            Some(CallbackOutcome::Success { code, .. }) => assert_eq!(code, "a+b"),
            _ => panic!("expected success outcome"),
        }
    }

    #[test]
    fn surfaces_error_description() {
        match parse_callback("/callback?error=access_denied&error_description=denied%20by%20user")
        {
            Some(CallbackOutcome::Error(description)) => assert_eq!(description, "denied by user"),
            _ => panic!("expected error outcome"),
        }
    }

    #[test]
    fn bare_error_code_is_still_an_error_outcome() {
        match parse_callback("/callback?error=access_denied&state=s") {
            Some(CallbackOutcome::Error(description)) => assert_eq!(description, "access_denied"),
            _ => panic!("expected error outcome"),
        }
    }

    #[test]
    fn ignores_other_routes() {
        assert!(parse_callback("/favicon.ico?code=a&state=b").is_none());
        assert!(parse_callback("/callback").is_none());
    }
}
