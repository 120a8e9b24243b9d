//! Per-session state: identity from the inbound bearer, forwarded tokens,
//! and the session-scoped upstream clients that carry them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use muster_oauth::OAuthClient;
use muster_oauth::StoredToken;
use muster_oauth::discover_issuer;
use muster_upstream::UpstreamClient;
use rmcp::RoleServer;
use rmcp::service::Peer;
use tokio::sync::RwLock;
use tracing::debug;
use tracing::warn;
use uuid::Uuid;

pub struct SessionState {
    id: String,
    /// Bearer presented by the client on the inbound connection, if any.
    identity: RwLock<Option<String>>,
    /// Per-upstream tokens carried on behalf of this session's user.
    forwarded_tokens: RwLock<HashMap<String, StoredToken>>,
    /// Clients built with a forwarded token; keyed by upstream name.
    clients: RwLock<HashMap<String, Arc<UpstreamClient>>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity: RwLock::new(None),
            forwarded_tokens: RwLock::new(HashMap::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn identity(&self) -> Option<String> {
        self.identity.read().await.clone()
    }

    pub async fn set_identity(&self, bearer: Option<String>) {
        *self.identity.write().await = bearer;
    }

    pub async fn put_forwarded_token(&self, upstream: &str, token: StoredToken) {
        self.clients.write().await.remove(upstream);
        self.forwarded_tokens
            .write()
            .await
            .insert(upstream.to_string(), token);
    }

    /// Returns a token that is valid at send time: expired records are
    /// refreshed through their issuer when possible and dropped otherwise.
    pub async fn forwarded_token(
        &self,
        upstream: &str,
        http: &reqwest::Client,
    ) -> Option<StoredToken> {
        let token = self.forwarded_tokens.read().await.get(upstream).cloned()?;
        let now = Utc::now();
        if !token.is_expired(now) {
            return Some(token);
        }
        if token.refresh_token.is_none() {
            debug!("dropping expired forwarded token for upstream `{upstream}`");
            self.clear_forwarded_token(upstream).await;
            return None;
        }

        let refreshed = async {
            let metadata = discover_issuer(http, &token.issuer_url).await.ok()?;
            OAuthClient::new(http.clone(), "muster")
                .refresh(&metadata.token_endpoint, &token)
                .await
                .ok()
        }
        .await;

        match refreshed {
            Some(refreshed) => {
                self.put_forwarded_token(upstream, refreshed.clone()).await;
                Some(refreshed)
            }
            None => {
                warn!("failed to refresh forwarded token for upstream `{upstream}`");
                self.clear_forwarded_token(upstream).await;
                None
            }
        }
    }

    pub async fn has_forwarded_token(&self, upstream: &str) -> bool {
        self.forwarded_tokens.read().await.contains_key(upstream)
    }

    /// Drops the session's token and client for an upstream. Called when a
    /// dispatch with the forwarded token came back 401.
    pub async fn clear_forwarded_token(&self, upstream: &str) {
        self.forwarded_tokens.write().await.remove(upstream);
        let client = self.clients.write().await.remove(upstream);
        if let Some(client) = client {
            client.close().await;
        }
    }

    pub async fn cached_client(&self, upstream: &str) -> Option<Arc<UpstreamClient>> {
        self.clients.read().await.get(upstream).cloned()
    }

    pub async fn cache_client(&self, upstream: &str, client: Arc<UpstreamClient>) {
        self.clients
            .write()
            .await
            .insert(upstream.to_string(), client);
    }

    async fn close(&self) {
        let clients: Vec<Arc<UpstreamClient>> =
            self.clients.write().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            client.close().await;
        }
    }
}

/// All live sessions plus their server-side peers for push notifications.
/// Lock discipline: plain mutex-style `std` locks with no await inside a
/// critical section, so the sync construction path (the per-session service
/// factory) can use it too.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: std::sync::RwLock<HashMap<String, Arc<SessionState>>>,
    peers: std::sync::RwLock<HashMap<String, Peer<RoleServer>>>,
}

impl SessionRegistry {
    pub fn create_session(&self) -> Arc<SessionState> {
        let session = Arc::new(SessionState::new());
        self.sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(session.id().to_string(), Arc::clone(&session));
        session
    }

    pub fn register_peer(&self, session_id: &str, peer: Peer<RoleServer>) {
        self.peers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(session_id.to_string(), peer);
    }

    pub fn peers(&self) -> Vec<(String, Peer<RoleServer>)> {
        self.peers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(id, peer)| (id.clone(), peer.clone()))
            .collect()
    }

    pub fn drop_peer(&self, session_id: &str) {
        self.peers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(session_id);
    }

    pub async fn remove_session(&self, session_id: &str) {
        self.drop_peer(session_id);
        let session = self
            .sessions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(session_id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use muster_oauth::StoredToken;

    use super::SessionRegistry;

    fn token(upstream_url: &str, expires_in_secs: i64) -> StoredToken {
        StoredToken {
            access_token: "SESSION_AT".to_string(),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            issuer_url: "https://issuer.example.com".to_string(),
            server_url: upstream_url.to_string(),
            scopes: None,
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let registry = SessionRegistry::default();
        let a = registry.create_session();
        let b = registry.create_session();
        assert_ne!(a.id(), b.id());

        let http = reqwest::Client::new();
        a.put_forwarded_token("notes", token("https://notes.example.com", 3600))
            .await;

        assert!(a.forwarded_token("notes", &http).await.is_some());
        assert!(b.forwarded_token("notes", &http).await.is_none());
    }

    #[tokio::test]
    async fn clearing_one_session_leaves_others_untouched() {
        let registry = SessionRegistry::default();
        let a = registry.create_session();
        let b = registry.create_session();
        let http = reqwest::Client::new();

        a.put_forwarded_token("notes", token("https://notes.example.com", 3600))
            .await;
        b.put_forwarded_token("notes", token("https://notes.example.com", 3600))
            .await;

        a.clear_forwarded_token("notes").await;
        assert!(a.forwarded_token("notes", &http).await.is_none());
        assert!(b.forwarded_token("notes", &http).await.is_some());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_reads_as_absent() {
        let registry = SessionRegistry::default();
        let session = registry.create_session();
        let http = reqwest::Client::new();

        session
            .put_forwarded_token("notes", token("https://notes.example.com", -10))
            .await;
        assert!(session.forwarded_token("notes", &http).await.is_none());
        // And the dead record is gone, not retried forever.
        assert!(!session.has_forwarded_token("notes").await);
    }
}
