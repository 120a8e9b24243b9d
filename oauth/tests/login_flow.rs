//! End-to-end PKCE login against a mocked issuer: discovery, loopback
//! callback, code exchange, and token persistence. The "browser" is a plain
//! HTTP GET against the callback listener.

use std::net::TcpListener;
use std::sync::Arc;

use muster_oauth::AuthError;
use muster_oauth::LoginOptions;
use muster_oauth::TokenStore;
use muster_oauth::begin_login;
use muster_oauth::discover_issuer;
use pretty_assertions::assert_eq;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let port = listener.local_addr().expect("probe addr").port();
    drop(listener);
    port
}

fn query_param(url: &url::Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[tokio::test]
async fn pkce_login_happy_path_stores_all_fields() {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": issuer.uri(),
            "authorization_endpoint": format!("{}/authorize", issuer.uri()),
            "token_endpoint": format!("{}/token", issuer.uri()),
            "code_challenge_methods_supported": ["S256"],
        })))
        .mount(&issuer)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=CODE"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "AT",
            "refresh_token": "RT",
            "id_token": "ID",
            "expires_in": 3600,
        })))
        .mount(&issuer)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TokenStore::new(dir.path()));
    let http = reqwest::Client::new();
    let metadata = discover_issuer(&http, &issuer.uri()).await.expect("discovery");

    let endpoint = "https://api.example.com";
    let options = LoginOptions {
        callback_port: free_port(),
        open_browser: false,
        ..Default::default()
    };
    let port = options.callback_port;
    let handle = begin_login(http.clone(), Arc::clone(&store), endpoint, &metadata, options)
        .expect("begin login");

    let auth_url = url::Url::parse(handle.authorization_url()).expect("authorization url");
    assert_eq!(query_param(&auth_url, "response_type").as_deref(), Some("code"));
    assert_eq!(
        query_param(&auth_url, "code_challenge_method").as_deref(),
        Some("S256")
    );
    let state = query_param(&auth_url, "state").expect("state param");

    // Stand in for the browser redirect.
    let callback = http
        .get(format!(
            "http://127.0.0.1:{port}/callback?code=CODE&state={state}"
        ))
        .send()
        .await
        .expect("callback request");
    assert!(callback.status().is_success());

    let token = handle.wait().await.expect("login completes");
    assert_eq!(token.access_token, "AT");
    assert_eq!(token.refresh_token.as_deref(), Some("RT"));
    assert_eq!(token.id_token.as_deref(), Some("ID"));
    assert_eq!(token.server_url, endpoint);
    assert_eq!(token.issuer_url, issuer.uri());
    let remaining = token.expires_at - chrono::Utc::now();
    assert!(remaining > chrono::Duration::seconds(3500));

    let persisted = store.get(endpoint).expect("store read").expect("record");
    assert_eq!(persisted, token);
}

#[tokio::test]
async fn state_mismatch_fails_the_login() {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": issuer.uri(),
            "authorization_endpoint": format!("{}/authorize", issuer.uri()),
            "token_endpoint": format!("{}/token", issuer.uri()),
        })))
        .mount(&issuer)
        .await;

    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TokenStore::new(dir.path()));
    let http = reqwest::Client::new();
    let metadata = discover_issuer(&http, &issuer.uri()).await.expect("discovery");

    let options = LoginOptions {
        callback_port: free_port(),
        open_browser: false,
        ..Default::default()
    };
    let port = options.callback_port;
    let handle = begin_login(
        http.clone(),
        Arc::clone(&store),
        "https://api.example.com",
        &metadata,
        options,
    )
    .expect("begin login");

    let _ = http
        .get(format!(
            "http://127.0.0.1:{port}/callback?code=CODE&state=forged"
        ))
        .send()
        .await
        .expect("callback request");

    let err = handle.wait().await.expect_err("login must fail");
    assert!(matches!(err, AuthError::StateMismatch));
    assert!(
        store
            .get("https://api.example.com")
            .expect("store read")
            .is_none()
    );
}

#[tokio::test]
async fn busy_callback_port_is_a_distinct_error() {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": issuer.uri(),
            "authorization_endpoint": format!("{}/authorize", issuer.uri()),
            "token_endpoint": format!("{}/token", issuer.uri()),
        })))
        .mount(&issuer)
        .await;

    let http = reqwest::Client::new();
    let metadata = discover_issuer(&http, &issuer.uri()).await.expect("discovery");

    let occupied = TcpListener::bind("127.0.0.1:0").expect("occupy a port");
    let port = occupied.local_addr().expect("addr").port();

    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(TokenStore::new(dir.path()));
    let err = begin_login(
        http,
        store,
        "https://api.example.com",
        &metadata,
        LoginOptions {
            callback_port: port,
            open_browser: false,
            ..Default::default()
        },
    )
    .expect_err("bind must fail");
    assert!(matches!(err, AuthError::CallbackPortInUse(p) if p == port));
}
