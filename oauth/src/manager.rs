//! Per-endpoint auth façade: probe, login, bearer supply, proactive refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::info;

use crate::challenge::BearerChallenge;
use crate::client::OAuthClient;
use crate::discovery::IssuerMetadata;
use crate::discovery::discover_issuer;
use crate::endpoint::normalize_endpoint;
use crate::error::AuthError;
use crate::login::LoginHandle;
use crate::login::LoginOptions;
use crate::login::begin_login;
use crate::store::TokenStore;
use crate::tokens::StoredToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Unknown,
    PendingAuth,
    Authenticated,
    Error,
    TokenExpired,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Proactive refresh fires when the access token expires within this
    /// window.
    pub refresh_threshold: Duration,
    /// When false, `bearer_token()` never refreshes implicitly.
    pub silent_refresh: bool,
    pub login: LoginOptions,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(60),
            silent_refresh: true,
            login: LoginOptions::default(),
        }
    }
}

/// Auth state machine for one normalized endpoint.
pub struct EndpointAuth {
    endpoint: String,
    http: reqwest::Client,
    store: Arc<TokenStore>,
    config: AuthConfig,
    state: RwLock<AuthState>,
    challenge: RwLock<Option<BearerChallenge>>,
    issuer_metadata: RwLock<Option<IssuerMetadata>>,
    last_error: RwLock<Option<String>>,
    /// Collapses concurrent refreshes: one caller POSTs, the rest re-read
    /// the store after the gate opens.
    refresh_gate: Mutex<()>,
}

impl EndpointAuth {
    pub fn new(
        raw_endpoint: &str,
        http: reqwest::Client,
        store: Arc<TokenStore>,
        config: AuthConfig,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            endpoint: normalize_endpoint(raw_endpoint)?,
            http,
            store,
            config,
            state: RwLock::new(AuthState::Unknown),
            challenge: RwLock::new(None),
            issuer_metadata: RwLock::new(None),
            last_error: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn state(&self) -> AuthState {
        *self.state.read().await
    }

    pub async fn challenge(&self) -> Option<BearerChallenge> {
        self.challenge.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    /// Probes the endpoint. A 401 with a parseable Bearer challenge moves to
    /// `PendingAuth`; any non-auth response leaves the machine alone unless a
    /// valid stored token already implies `Authenticated`.
    pub async fn check_connection(&self) -> Result<AuthState, AuthError> {
        let response = self.http.get(&self.endpoint).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .and_then(BearerChallenge::parse);
            match challenge {
                Some(challenge) => {
                    debug!(
                        endpoint = %self.endpoint,
                        issuer = challenge.authorization_server.as_deref().unwrap_or("<unknown>"),
                        "endpoint requires authentication"
                    );
                    *self.challenge.write().await = Some(challenge);
                    self.set_state(AuthState::PendingAuth).await;
                }
                None => {
                    self.record_error("401 without a parseable Bearer challenge")
                        .await;
                }
            }
            return Ok(self.state().await);
        }

        if self.store.get(&self.endpoint)?.is_some() {
            self.set_state(AuthState::Authenticated).await;
        }
        Ok(self.state().await)
    }

    /// Starts the PKCE login. The issuer comes from the cached challenge or,
    /// when no probe ran, from the stored token's issuer.
    pub async fn start_login(&self) -> Result<LoginHandle, AuthError> {
        let issuer = self.issuer_url().await?;
        let metadata = self.issuer_metadata(&issuer).await?;
        self.set_state(AuthState::PendingAuth).await;
        begin_login(
            self.http.clone(),
            Arc::clone(&self.store),
            &self.endpoint,
            &metadata,
            self.config.login.clone(),
        )
    }

    /// Awaits a login started with [`start_login`] and settles the machine.
    pub async fn finish_login(&self, handle: LoginHandle) -> Result<StoredToken, AuthError> {
        match handle.wait().await {
            Ok(token) => {
                info!(endpoint = %self.endpoint, "authenticated");
                *self.last_error.write().await = None;
                self.set_state(AuthState::Authenticated).await;
                Ok(token)
            }
            Err(err) => {
                self.record_error(&err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Returns the current access token, or a typed failure telling the
    /// caller which issuer to log in against. Never blocks on a login.
    pub async fn bearer_token(&self) -> Result<String, AuthError> {
        if self.config.silent_refresh {
            // Outcome is reflected in the store; a failed refresh falls
            // through to the expiry handling below.
            let _ = self.refresh_if_needed().await;
        }

        if let Some(token) = self.store.get(&self.endpoint)? {
            self.set_state(AuthState::Authenticated).await;
            return Ok(token.access_token);
        }

        if self.store.get_including_expiring(&self.endpoint)?.is_some() {
            self.set_state(AuthState::TokenExpired).await;
            return Err(AuthError::Expired {
                endpoint: self.endpoint.clone(),
            });
        }

        self.set_state(AuthState::PendingAuth).await;
        Err(AuthError::Required {
            endpoint: self.endpoint.clone(),
            issuer: self.issuer_url().await.unwrap_or_default(),
        })
    }

    /// Refreshes when the stored token is inside the pre-expiry window.
    /// Returns whether a refresh happened (here or in a concurrent caller).
    pub async fn refresh_if_needed(&self) -> Result<bool, AuthError> {
        let now = Utc::now();
        let Some(current) = self.store.get_including_expiring(&self.endpoint)? else {
            return Ok(false);
        };
        if !current.expires_within(now, self.config.refresh_threshold) {
            return Ok(false);
        }
        if current.refresh_token.is_none() {
            if current.is_expired(now) {
                self.set_state(AuthState::TokenExpired).await;
            }
            return Ok(false);
        }

        self.refresh_single_flight().await?;
        Ok(true)
    }

    /// Refreshes regardless of the threshold.
    pub async fn force_refresh(&self) -> Result<StoredToken, AuthError> {
        let _gate = self.refresh_gate.lock().await;
        let Some(current) = self.store.get_including_expiring(&self.endpoint)? else {
            return Err(AuthError::Required {
                endpoint: self.endpoint.clone(),
                issuer: self.issuer_url().await.unwrap_or_default(),
            });
        };
        self.refresh_locked(current).await
    }

    pub async fn logout(&self) -> Result<(), AuthError> {
        self.store.delete(&self.endpoint)?;
        *self.challenge.write().await = None;
        self.set_state(AuthState::Unknown).await;
        Ok(())
    }

    async fn refresh_single_flight(&self) -> Result<(), AuthError> {
        let _gate = self.refresh_gate.lock().await;
        // A concurrent caller may have refreshed while this one waited on
        // the gate; re-read before deciding to POST.
        let Some(current) = self.store.get_including_expiring(&self.endpoint)? else {
            return Ok(());
        };
        if !current.expires_within(Utc::now(), self.config.refresh_threshold) {
            return Ok(());
        }
        self.refresh_locked(current).await?;
        Ok(())
    }

    async fn refresh_locked(&self, current: StoredToken) -> Result<StoredToken, AuthError> {
        let metadata = self.issuer_metadata(&current.issuer_url).await?;
        let client = OAuthClient::new(self.http.clone(), self.config.login.client_id.clone());
        match client.refresh(&metadata.token_endpoint, &current).await {
            Ok(refreshed) => {
                self.store.put(&self.endpoint, &refreshed)?;
                self.set_state(AuthState::Authenticated).await;
                debug!(endpoint = %self.endpoint, "access token refreshed");
                Ok(refreshed)
            }
            Err(err @ AuthError::Rejected { .. }) => {
                // Terminal: the grant is dead. Keep the record for issuer
                // bookkeeping, but the machine is expired.
                self.set_state(AuthState::TokenExpired).await;
                self.record_error(&err.to_string()).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn issuer_url(&self) -> Result<String, AuthError> {
        if let Some(challenge) = self.challenge.read().await.as_ref()
            && let Some(issuer) = challenge.authorization_server.clone()
        {
            return Ok(issuer);
        }
        if let Some(token) = self.store.get_including_expiring(&self.endpoint)? {
            return Ok(token.issuer_url);
        }
        Err(AuthError::Required {
            endpoint: self.endpoint.clone(),
            issuer: String::new(),
        })
    }

    async fn issuer_metadata(&self, issuer: &str) -> Result<IssuerMetadata, AuthError> {
        if let Some(metadata) = self.issuer_metadata.read().await.as_ref()
            && metadata.issuer.trim_end_matches('/') == issuer.trim_end_matches('/')
        {
            return Ok(metadata.clone());
        }
        let metadata = discover_issuer(&self.http, issuer).await?;
        *self.issuer_metadata.write().await = Some(metadata.clone());
        Ok(metadata)
    }

    async fn set_state(&self, state: AuthState) {
        *self.state.write().await = state;
    }

    async fn record_error(&self, message: &str) {
        *self.last_error.write().await = Some(message.to_string());
        self.set_state(AuthState::Error).await;
    }
}

/// Explicitly constructed registry of per-endpoint auth machines. There is
/// no process-wide registration; owners wire this where they need it.
pub struct AuthRegistry {
    http: reqwest::Client,
    store: Arc<TokenStore>,
    config: AuthConfig,
    endpoints: RwLock<HashMap<String, Arc<EndpointAuth>>>,
}

impl AuthRegistry {
    pub fn new(http: reqwest::Client, store: Arc<TokenStore>, config: AuthConfig) -> Self {
        Self {
            http,
            store,
            config,
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<TokenStore> {
        Arc::clone(&self.store)
    }

    /// Returns the machine for `raw_endpoint`, creating it on first use.
    /// Endpoints that normalize identically share one machine.
    pub async fn for_endpoint(&self, raw_endpoint: &str) -> Result<Arc<EndpointAuth>, AuthError> {
        let normalized = normalize_endpoint(raw_endpoint)?;
        if let Some(auth) = self.endpoints.read().await.get(&normalized) {
            return Ok(Arc::clone(auth));
        }

        let mut endpoints = self.endpoints.write().await;
        if let Some(auth) = endpoints.get(&normalized) {
            return Ok(Arc::clone(auth));
        }
        let auth = Arc::new(EndpointAuth::new(
            &normalized,
            self.http.clone(),
            Arc::clone(&self.store),
            self.config.clone(),
        )?);
        endpoints.insert(normalized, Arc::clone(&auth));
        Ok(auth)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;
    use wiremock::matchers::method;
    use wiremock::matchers::path;

    use super::AuthConfig;
    use super::AuthRegistry;
    use super::AuthState;
    use super::EndpointAuth;
    use crate::store::TokenStore;
    use crate::tokens::StoredToken;

    fn test_config() -> AuthConfig {
        AuthConfig {
            refresh_threshold: Duration::from_secs(60),
            silent_refresh: true,
            login: crate::login::LoginOptions {
                open_browser: false,
                ..Default::default()
            },
        }
    }

    fn stored_token(endpoint: &str, issuer: &str, expires_in_secs: i64) -> StoredToken {
        StoredToken {
            access_token: "AT".to_string(),
            refresh_token: Some("RT".to_string()),
            id_token: Some("ID_old".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            issuer_url: issuer.to_string(),
            server_url: endpoint.to_string(),
            scopes: None,
        }
    }

    async fn mount_issuer(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn probe_401_reaches_pending_auth_with_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "WWW-Authenticate",
                r#"Bearer realm="mcp", authz_server="https://issuer.example.com""#,
            ))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path()));
        let auth =
            EndpointAuth::new(&server.uri(), reqwest::Client::new(), store, test_config())
                .unwrap();

        let state = auth.check_connection().await.unwrap();
        assert_eq!(state, AuthState::PendingAuth);
        assert_eq!(
            auth.challenge().await.unwrap().authorization_server.as_deref(),
            Some("https://issuer.example.com")
        );

        let err = auth.bearer_token().await.unwrap_err();
        match err {
            crate::error::AuthError::Required { issuer, .. } => {
                assert_eq!(issuer, "https://issuer.example.com");
            }
            other => panic!("expected Required, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_refresh_preserves_id_token() {
        let server = MockServer::start().await;
        mount_issuer(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "AT_new",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path()));
        let endpoint = "https://api.example.com";
        store
            .put(endpoint, &stored_token(endpoint, &server.uri(), 30))
            .unwrap();

        let auth = EndpointAuth::new(
            endpoint,
            reqwest::Client::new(),
            Arc::clone(&store),
            test_config(),
        )
        .unwrap();

        let bearer = auth.bearer_token().await.unwrap();
        assert_eq!(bearer, "AT_new");

        let record = store.get(endpoint).unwrap().unwrap();
        assert_eq!(record.access_token, "AT_new");
        assert_eq!(record.refresh_token.as_deref(), Some("RT"));
        assert_eq!(record.id_token.as_deref(), Some("ID_old"));
    }

    #[tokio::test]
    async fn concurrent_refreshes_collapse_to_one_post() {
        let server = MockServer::start().await;
        mount_issuer(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(100))
                    .set_body_json(serde_json::json!({
                        "access_token": "AT_new",
                        "expires_in": 3600,
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path()));
        let endpoint = "https://api.example.com";
        store
            .put(endpoint, &stored_token(endpoint, &server.uri(), 30))
            .unwrap();

        let auth = Arc::new(
            EndpointAuth::new(endpoint, reqwest::Client::new(), store, test_config()).unwrap(),
        );

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move { auth.bearer_token().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "AT_new");
        }
        // The mock's `expect(1)` verifies the single-flight on drop.
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_token_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path()));
        let endpoint = "https://api.example.com";
        let mut token = stored_token(endpoint, "https://issuer.example.com", -10);
        token.refresh_token = None;
        store.put(endpoint, &token).unwrap();

        let auth =
            EndpointAuth::new(endpoint, reqwest::Client::new(), store, test_config()).unwrap();

        let err = auth.bearer_token().await.unwrap_err();
        assert!(matches!(err, crate::error::AuthError::Expired { .. }));
        assert_eq!(auth.state().await, AuthState::TokenExpired);
    }

    #[tokio::test]
    async fn registry_shares_machines_across_endpoint_variants() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TokenStore::new(dir.path()));
        let registry = AuthRegistry::new(reqwest::Client::new(), store, test_config());

        let a = registry
            .for_endpoint("https://api.example.com/mcp")
            .await
            .unwrap();
        let b = registry
            .for_endpoint("https://api.example.com/sse/")
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.endpoint(), "https://api.example.com");
    }
}
