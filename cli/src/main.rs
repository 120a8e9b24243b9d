mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use muster_core::AuthMode;
use muster_core::Catalog;
use muster_core::CatalogService;
use muster_core::EventBus;
use muster_core::UpstreamManager;
use muster_core::env_overrides;
use muster_gateway::GatewayServer;
use muster_gateway::GatewayState;
use muster_gateway::SessionRegistry;
use muster_oauth::AuthConfig;
use muster_oauth::AuthRegistry;
use muster_oauth::AuthState;
use muster_oauth::LoginOptions;
use muster_oauth::TokenStore;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::load_config;
use crate::config::token_store_dir;

/// Aggregating gateway for MCP servers.
#[derive(Parser)]
#[command(name = "muster", version)]
struct Cli {
    /// Path to the config file (default: $MUSTER_HOME/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway.
    Serve,
    /// Log in to an upstream MCP endpoint via OAuth.
    Login {
        /// Endpoint URL (default: $MUSTER_ENDPOINT).
        endpoint: Option<String>,
    },
    /// Delete the stored token for an endpoint.
    Logout {
        /// Endpoint URL (default: $MUSTER_ENDPOINT).
        endpoint: Option<String>,
    },
    /// Show stored credentials.
    Status,
}

fn auth_config() -> AuthConfig {
    let overrides = env_overrides();
    let mut login = LoginOptions::default();
    if let Some(port) = overrides.oauth_callback_port {
        login.callback_port = port;
    }
    login.open_browser = overrides.auth_mode == AuthMode::Auto;
    AuthConfig {
        silent_refresh: overrides.auth_mode != AuthMode::None,
        login,
        ..Default::default()
    }
}

fn auth_registry() -> Result<Arc<AuthRegistry>> {
    let store = Arc::new(TokenStore::new(token_store_dir()?));
    Ok(Arc::new(AuthRegistry::new(
        reqwest::Client::new(),
        store,
        auth_config(),
    )))
}

fn resolve_endpoint(endpoint: Option<String>) -> Result<String> {
    endpoint
        .or_else(|| env_overrides().endpoint.clone())
        .context("no endpoint given; pass one or set MUSTER_ENDPOINT")
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path.as_deref())?;
    let auth = auth_registry()?;

    let bus = EventBus::default();
    let (catalog_tx, catalog_rx) = tokio::sync::watch::channel(Catalog::empty());
    let manager = Arc::new(UpstreamManager::new(
        Arc::clone(&auth),
        bus.clone(),
        catalog_rx,
    ));
    let catalog = CatalogService::start(Arc::clone(&manager), &bus, catalog_tx);

    let summary = manager.reconcile(config.desired_upstreams()).await;
    for (name, reason) in &summary.rejected {
        tracing::warn!("skipping upstream `{name}`: {reason}");
    }

    let state = Arc::new(GatewayState {
        manager: Arc::clone(&manager),
        catalog: catalog.watch(),
        sessions: Arc::new(SessionRegistry::default()),
        http: reqwest::Client::new(),
    });

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            signal_shutdown.cancel();
        }
    });

    let server = GatewayServer::new(config.gateway, state);
    let result = server.run(shutdown).await;
    manager.shutdown().await;
    result
}

async fn login(endpoint: Option<String>) -> Result<()> {
    if env_overrides().auth_mode == AuthMode::None {
        bail!("MUSTER_AUTH_MODE=none forbids interactive logins");
    }
    let endpoint = resolve_endpoint(endpoint)?;
    let registry = auth_registry()?;
    let auth = registry.for_endpoint(&endpoint).await?;

    // Probe first so the challenge (and with it the issuer) is known.
    match auth.check_connection().await {
        Ok(state) => info!("endpoint {} is {state:?}", auth.endpoint()),
        Err(err) => tracing::warn!("probe of {} failed: {err}", auth.endpoint()),
    }

    let handle = auth.start_login().await?;
    println!(
        "Authorize `{}` by opening this URL in your browser:\n{}\n",
        auth.endpoint(),
        handle.authorization_url()
    );
    let token = auth.finish_login(handle).await?;
    println!(
        "Logged in to {} (token expires {})",
        token.server_url, token.expires_at
    );
    Ok(())
}

async fn logout(endpoint: Option<String>) -> Result<()> {
    let endpoint = resolve_endpoint(endpoint)?;
    let registry = auth_registry()?;
    let auth = registry.for_endpoint(&endpoint).await?;
    auth.logout().await?;
    println!("Removed credentials for {}", auth.endpoint());
    Ok(())
}

fn status() -> Result<()> {
    let store = TokenStore::new(token_store_dir()?);
    let tokens = store.list()?;
    if tokens.is_empty() {
        println!("No stored credentials.");
        return Ok(());
    }
    let now = chrono::Utc::now();
    for token in tokens {
        let state = if token.is_expired(now) {
            if token.refresh_token.is_some() {
                AuthState::TokenExpired
            } else {
                AuthState::Error
            }
        } else {
            AuthState::Authenticated
        };
        println!(
            "{}\n  issuer: {}\n  state: {state:?}\n  expires: {}",
            token.server_url, token.issuer_url, token.expires_at
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve => serve(cli.config).await,
        Command::Login { endpoint } => login(endpoint).await,
        Command::Logout { endpoint } => logout(endpoint).await,
        Command::Status => status(),
    }
}
