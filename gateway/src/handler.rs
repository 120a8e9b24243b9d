//! The inbound MCP surface: one handler per session, serving list methods
//! from the catalog snapshot and routing invocations to the owning
//! upstream's client with the right bearer.

use std::sync::Arc;

use muster_core::Catalog;
use muster_core::CatalogDetail;
use muster_core::CatalogItem;
use muster_core::CatalogKind;
use muster_core::GatewayError;
use muster_core::UpstreamLifecycle;
use muster_core::UpstreamManager;
use muster_core::UpstreamService;
use muster_core::UpstreamTransportConfig;
use muster_upstream::UpstreamClient;
use muster_upstream::UpstreamClientError;
use rmcp::RoleServer;
use rmcp::handler::server::ServerHandler;
use rmcp::model::CallToolRequestParam;
use rmcp::model::CallToolResult;
use rmcp::model::ClientCapabilities;
use rmcp::model::ErrorData;
use rmcp::model::GetPromptRequestParam;
use rmcp::model::GetPromptResult;
use rmcp::model::Implementation;
use rmcp::model::InitializeRequestParam;
use rmcp::model::ListPromptsResult;
use rmcp::model::ListResourcesResult;
use rmcp::model::ListToolsResult;
use rmcp::model::PaginatedRequestParam;
use rmcp::model::ProtocolVersion;
use rmcp::model::ReadResourceRequestParam;
use rmcp::model::ReadResourceResult;
use rmcp::model::ServerCapabilities;
use rmcp::model::ServerInfo;
use rmcp::service::NotificationContext;
use rmcp::service::RequestContext;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

use crate::errors::to_error_data;
use crate::meta;
use crate::session::SessionRegistry;
use crate::session::SessionState;

/// Inbound bearer extracted by the HTTP layer and forwarded through request
/// extensions.
#[derive(Debug, Clone)]
pub struct InboundIdentity(pub String);

/// Shared wiring for every session handler.
pub struct GatewayState {
    pub manager: Arc<UpstreamManager>,
    pub catalog: watch::Receiver<Arc<Catalog>>,
    pub sessions: Arc<SessionRegistry>,
    pub http: reqwest::Client,
}

impl GatewayState {
    pub fn catalog_snapshot(&self) -> Arc<Catalog> {
        self.catalog.borrow().clone()
    }
}

#[derive(Clone)]
pub struct GatewayHandler {
    state: Arc<GatewayState>,
    session: Arc<SessionState>,
}

impl GatewayHandler {
    /// Creates the handler for one new session; the service factory calls
    /// this once per inbound session.
    pub fn new_session(state: Arc<GatewayState>) -> Self {
        let session = state.sessions.create_session();
        debug!("session {} created", session.id());
        Self { state, session }
    }

    pub fn session(&self) -> Arc<SessionState> {
        Arc::clone(&self.session)
    }

    async fn adopt_identity(&self, extensions: &rmcp::model::Extensions) {
        if let Some(identity) = extensions.get::<InboundIdentity>()
            && self.session.identity().await.as_deref() != Some(identity.0.as_str())
        {
            self.session.set_identity(Some(identity.0.clone())).await;
        }
    }

    fn resolve_tool(
        &self,
        catalog: &Catalog,
        public_name: &str,
    ) -> Result<CatalogItem, ErrorData> {
        let item = catalog.resolve(public_name).ok_or_else(|| {
            to_error_data(GatewayError::NotFound {
                name: public_name.to_string(),
            })
        })?;
        if item.detail.kind() != CatalogKind::Tool {
            return Err(to_error_data(GatewayError::Invalid {
                reason: format!("`{public_name}` is a {}, not a tool", item.detail.kind().as_str()),
            }));
        }
        Ok(item.clone())
    }

    async fn issuer_for(&self, service: &UpstreamService) -> String {
        let Some(url) = service.config().transport.url() else {
            return String::new();
        };
        let auth = match self.state.manager.auth().for_endpoint(url).await {
            Ok(auth) => auth,
            Err(_) => return String::new(),
        };
        if let Some(challenge) = auth.challenge().await
            && let Some(issuer) = challenge.authorization_server
        {
            return issuer;
        }
        match self.state.manager.auth().store().get_including_expiring(url) {
            Ok(Some(token)) => token.issuer_url,
            _ => String::new(),
        }
    }

    async fn ready_service(&self, upstream: &str) -> Result<Arc<UpstreamService>, ErrorData> {
        let service = self.state.manager.get(upstream).await.ok_or_else(|| {
            to_error_data(GatewayError::NotFound {
                name: upstream.to_string(),
            })
        })?;
        let status = service.status();
        match status.lifecycle {
            UpstreamLifecycle::Running => Ok(service),
            UpstreamLifecycle::AuthRequired => {
                let issuer = self.issuer_for(&service).await;
                Err(to_error_data(GatewayError::AuthRequired {
                    upstream: upstream.to_string(),
                    issuer,
                }))
            }
            other => Err(to_error_data(GatewayError::UpstreamNotReady {
                upstream: upstream.to_string(),
                state: other
                    .display_for(service.config().transport.kind())
                    .to_string(),
            })),
        }
    }

    /// Selects the client for this session: a session-scoped client carrying
    /// the forwarded token when one exists, the upstream's shared client
    /// otherwise. The bool reports whether the session token was used.
    async fn select_client(
        &self,
        service: &UpstreamService,
    ) -> Result<(Arc<UpstreamClient>, bool), ErrorData> {
        let upstream = service.name();
        let (url, headers) = match &service.config().transport {
            UpstreamTransportConfig::StreamableHttp {
                url, http_headers, ..
            }
            | UpstreamTransportConfig::Sse {
                url, http_headers, ..
            } => (url.clone(), http_headers.clone()),
            UpstreamTransportConfig::Stdio { .. } => {
                let client = service.client().await.ok_or_else(|| {
                    to_error_data(GatewayError::UpstreamNotReady {
                        upstream: upstream.to_string(),
                        state: "stopped".to_string(),
                    })
                })?;
                return Ok((client, false));
            }
        };

        let token = self
            .session
            .forwarded_token(upstream, &self.state.http)
            .await;
        let Some(token) = token else {
            let client = service.client().await.ok_or_else(|| {
                to_error_data(GatewayError::UpstreamNotReady {
                    upstream: upstream.to_string(),
                    state: "disconnected".to_string(),
                })
            })?;
            return Ok((client, false));
        };

        if let Some(client) = self.session.cached_client(upstream).await {
            return Ok((client, true));
        }

        let client = UpstreamClient::new_streamable_http_client(
            upstream,
            &url,
            Some(&token.access_token),
            headers.as_ref(),
            Some(self.session.id()),
        )
        .map_err(|err| {
            to_error_data(GatewayError::UpstreamUnreachable {
                upstream: upstream.to_string(),
                reason: err.to_string(),
            })
        })?;
        if let Err(err) = client
            .initialize(session_client_info(), service.config().startup_timeout)
            .await
        {
            return Err(self.map_session_connect_error(service, err).await);
        }

        let client = Arc::new(client);
        self.session
            .cache_client(upstream, Arc::clone(&client))
            .await;
        Ok((client, true))
    }

    /// A forwarded token rejected at connect time is as dead as one rejected
    /// mid-call: drop it and hand the client the issuer to log in against.
    async fn map_session_connect_error(
        &self,
        service: &UpstreamService,
        err: UpstreamClientError,
    ) -> ErrorData {
        let upstream = service.name();
        if err.is_auth_required() {
            self.session.clear_forwarded_token(upstream).await;
            let issuer = self.issuer_for(service).await;
            to_error_data(GatewayError::AuthRequired {
                upstream: upstream.to_string(),
                issuer,
            })
        } else {
            to_error_data(GatewayError::UpstreamUnreachable {
                upstream: upstream.to_string(),
                reason: err.to_string(),
            })
        }
    }

    /// Translates a dispatch failure. A 401 under a session token clears
    /// only that session's token; the gateway-wide token and every other
    /// session are untouched.
    async fn map_dispatch_error(
        &self,
        service: &UpstreamService,
        via_session_token: bool,
        err: UpstreamClientError,
    ) -> ErrorData {
        let upstream = service.name();
        match err {
            UpstreamClientError::AuthorizationRequired => {
                if via_session_token {
                    info!(
                        "session {} token for upstream `{upstream}` rejected; clearing",
                        self.session.id()
                    );
                    self.session.clear_forwarded_token(upstream).await;
                }
                let issuer = self.issuer_for(service).await;
                to_error_data(GatewayError::AuthRequired {
                    upstream: upstream.to_string(),
                    issuer,
                })
            }
            UpstreamClientError::Timeout { .. } => to_error_data(GatewayError::UpstreamTimedOut {
                upstream: upstream.to_string(),
            }),
            UpstreamClientError::Mcp(data) => data,
            UpstreamClientError::InvalidArguments(reason) => {
                to_error_data(GatewayError::Invalid { reason })
            }
            UpstreamClientError::NotInitialized => {
                to_error_data(GatewayError::UpstreamNotReady {
                    upstream: upstream.to_string(),
                    state: "disconnected".to_string(),
                })
            }
            other => to_error_data(GatewayError::UpstreamUnreachable {
                upstream: upstream.to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

fn session_client_info() -> InitializeRequestParam {
    InitializeRequestParam {
        meta: None,
        protocol_version: ProtocolVersion::V_2025_06_18,
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "muster".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            title: Some("Muster".into()),
            description: None,
            icons: None,
            website_url: None,
        },
    }
}

impl ServerHandler for GatewayHandler {
    fn get_info(&self) -> ServerInfo {
        let catalog = self.state.catalog_snapshot();
        let mut builder = ServerCapabilities::builder()
            .enable_tools()
            .enable_tool_list_changed();
        if !catalog.resources().is_empty() {
            builder = builder.enable_resources();
        }
        if !catalog.prompts().is_empty() {
            builder = builder.enable_prompts();
        }

        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: builder.build(),
            server_info: Implementation {
                name: "muster".to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                title: Some("Muster MCP gateway".into()),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Aggregating MCP gateway. Tools from every configured upstream appear here \
                 under namespaced names; `list_tools` and `describe_tool` expose the full \
                 catalog with schemas, and `list_upstreams` reports upstream health."
                    .to_string(),
            ),
            ..ServerInfo::default()
        }
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        self.state
            .sessions
            .register_peer(self.session.id(), context.peer.clone());
        info!(
            "session {} initialized ({} live)",
            self.session.id(),
            self.state.sessions.session_count()
        );
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        self.adopt_identity(&context.extensions).await;
        let catalog = self.state.catalog_snapshot();

        let mut tools = meta::meta_tools();
        for item in catalog.tools() {
            if let CatalogDetail::Tool { tool } = &item.detail {
                let mut tool = tool.clone();
                tool.name = item.public_name.clone().into();
                tools.push(tool);
            }
        }
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        self.adopt_identity(&context.extensions).await;
        let catalog = self.state.catalog_snapshot();
        let public_name = request.name.to_string();
        let arguments = request.arguments.map(Value::Object);

        // Meta-tools shadow the catalog and never reach an upstream.
        if let Some(result) = meta::handle_meta_tool(
            &self.state.manager,
            &catalog,
            &public_name,
            arguments.as_ref(),
        )
        .await
        {
            return result;
        }

        let item = self.resolve_tool(&catalog, &public_name)?;
        let service = self.ready_service(&item.upstream).await?;
        let (client, via_session_token) = self.select_client(&service).await?;

        match client
            .call_tool(
                item.native_name.clone(),
                arguments,
                Some(service.tool_timeout()),
            )
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => Err(self.map_dispatch_error(&service, via_session_token, err).await),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        self.adopt_identity(&context.extensions).await;
        let catalog = self.state.catalog_snapshot();
        let resources = catalog
            .resources()
            .iter()
            .filter_map(|item| match &item.detail {
                CatalogDetail::Resource { resource } => Some(resource.clone()),
                _ => None,
            })
            .collect();
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        self.adopt_identity(&context.extensions).await;
        let catalog = self.state.catalog_snapshot();
        let item = catalog
            .resolve_resource_uri(&request.uri)
            .cloned()
            .ok_or_else(|| {
                to_error_data(GatewayError::NotFound {
                    name: request.uri.clone(),
                })
            })?;

        let service = self.ready_service(&item.upstream).await?;
        let (client, via_session_token) = self.select_client(&service).await?;
        match client
            .read_resource(request, Some(service.tool_timeout()))
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => Err(self.map_dispatch_error(&service, via_session_token, err).await),
        }
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        self.adopt_identity(&context.extensions).await;
        let catalog = self.state.catalog_snapshot();
        let prompts = catalog
            .prompts()
            .iter()
            .filter_map(|item| match &item.detail {
                CatalogDetail::Prompt { prompt } => {
                    let mut prompt = prompt.clone();
                    prompt.name = item.public_name.clone();
                    Some(prompt)
                }
                _ => None,
            })
            .collect();
        Ok(ListPromptsResult {
            prompts,
            next_cursor: None,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        self.adopt_identity(&context.extensions).await;
        let catalog = self.state.catalog_snapshot();
        let item = catalog
            .resolve(&request.name)
            .filter(|item| item.detail.kind() == CatalogKind::Prompt)
            .cloned()
            .ok_or_else(|| {
                to_error_data(GatewayError::NotFound {
                    name: request.name.clone(),
                })
            })?;

        let service = self.ready_service(&item.upstream).await?;
        let (client, via_session_token) = self.select_client(&service).await?;
        let native_request = GetPromptRequestParam {
            name: item.native_name.clone(),
            arguments: request.arguments,
        };
        match client
            .get_prompt(native_request, Some(service.tool_timeout()))
            .await
        {
            Ok(result) => Ok(result),
            Err(err) => Err(self.map_dispatch_error(&service, via_session_token, err).await),
        }
    }
}
