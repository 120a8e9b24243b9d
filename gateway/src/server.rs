//! Inbound HTTP server: rmcp streamable-HTTP at `/mcp`, SSE at `/sse`, and
//! a health probe.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::get;
use muster_core::GatewayConfig;
use rmcp::transport::sse_server::SseServer;
use rmcp::transport::sse_server::SseServerConfig;
use rmcp::transport::streamable_http_server::StreamableHttpServerConfig;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::handler::GatewayHandler;
use crate::handler::GatewayState;
use crate::handler::InboundIdentity;
use crate::notify::spawn_notifier;

const SSE_KEEP_ALIVE: std::time::Duration = std::time::Duration::from_secs(30);

pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<GatewayState>,
}

/// Copies an inbound `Authorization: Bearer` into request extensions, where
/// the per-session handler picks it up as the session identity.
async fn capture_identity(mut request: Request, next: Next) -> Response {
    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    if let Some(bearer) = bearer {
        request.extensions_mut().insert(InboundIdentity(bearer));
    }
    next.run(request).await
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: Arc<GatewayState>) -> Self {
        Self { config, state }
    }

    /// Serves until `shutdown` fires. Sessions in flight observe the
    /// cancellation through their transports.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let notifier = spawn_notifier(Arc::clone(&self.state));

        let mcp_state = Arc::clone(&self.state);
        let mcp_service = StreamableHttpService::new(
            move || Ok(GatewayHandler::new_session(Arc::clone(&mcp_state))),
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: Some(SSE_KEEP_ALIVE),
                sse_retry: Some(std::time::Duration::from_secs(3)),
                cancellation_token: shutdown.child_token(),
            },
        );

        let (sse_server, sse_router) = SseServer::new(SseServerConfig {
            bind: self.config.listen,
            sse_path: "/sse".to_string(),
            post_path: "/sse".to_string(),
            ct: shutdown.child_token(),
            sse_keep_alive: Some(SSE_KEEP_ALIVE),
        });
        let sse_state = Arc::clone(&self.state);
        sse_server.with_service(move || GatewayHandler::new_session(Arc::clone(&sse_state)));

        let health_state = Arc::clone(&self.state);
        let router = Router::new()
            .route(
                "/healthz",
                get(move || {
                    let state = Arc::clone(&health_state);
                    async move {
                        Json(json!({
                            "status": "ok",
                            "catalog_version": state.catalog_snapshot().version(),
                            "sessions": state.sessions.session_count(),
                        }))
                    }
                }),
            )
            .nest_service("/mcp", mcp_service)
            .merge(sse_router)
            .layer(axum::middleware::from_fn(capture_identity));

        let listener = tokio::net::TcpListener::bind(self.config.listen).await?;
        info!(
            "gateway listening on {} (mcp: /mcp, sse: /sse)",
            self.config.listen
        );

        let result = axum::serve(listener, router)
            .with_graceful_shutdown({
                let shutdown = shutdown.clone();
                async move { shutdown.cancelled().await }
            })
            .await;

        notifier.abort();
        result.map_err(Into::into)
    }
}
