//! One MCP client per upstream, built on the official `rmcp` SDK.
//! https://github.com/modelcontextprotocol/rust-sdk

use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderName;
use reqwest::header::HeaderValue;
use rmcp::model::CallToolRequestParam;
use rmcp::model::CallToolResult;
use rmcp::model::GetPromptRequestParam;
use rmcp::model::GetPromptResult;
use rmcp::model::InitializeRequestParam;
use rmcp::model::InitializeResult;
use rmcp::model::ListPromptsResult;
use rmcp::model::ListResourcesResult;
use rmcp::model::ListToolsResult;
use rmcp::model::PaginatedRequestParam;
use rmcp::model::ReadResourceRequestParam;
use rmcp::model::ReadResourceResult;
use rmcp::service::RoleClient;
use rmcp::service::RunningService;
use rmcp::service::serve_client;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time;
use tracing::info;
use tracing::warn;

use crate::error::UpstreamClientError;
use crate::handler::NotifyingClientHandler;
use crate::handler::UpstreamNotification;

/// Header attached to every outbound call so upstreams honoring per-user
/// tokens can correlate requests to one gateway session.
pub const SESSION_HEADER: &str = "x-muster-session-id";

enum PendingTransport {
    ChildProcess(TokioChildProcess),
    StreamableHttp {
        transport: StreamableHttpClientTransport<reqwest::Client>,
    },
}

enum ClientState {
    Connecting {
        transport: Option<PendingTransport>,
    },
    Ready {
        service: Arc<RunningService<RoleClient, NotifyingClientHandler>>,
        server_info: InitializeResult,
    },
    Closed,
}

/// MCP client for a single upstream over stdio or streamable-HTTP/SSE.
/// Two-phase: construct with a pending transport, then `initialize` runs the
/// MCP handshake and makes the typed request surface available.
pub struct UpstreamClient {
    server_name: String,
    state: Mutex<ClientState>,
    notifications: Mutex<Option<mpsc::UnboundedReceiver<UpstreamNotification>>>,
    notification_tx: mpsc::UnboundedSender<UpstreamNotification>,
}

impl UpstreamClient {
    pub async fn new_stdio_client(
        server_name: &str,
        program: OsString,
        args: Vec<OsString>,
        env: Option<HashMap<String, String>>,
    ) -> io::Result<Self> {
        let program_name = program.to_string_lossy().into_owned();

        let mut command = Command::new(program);
        command
            .kill_on_drop(true)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .args(&args);
        if let Some(env) = env {
            command.envs(env);
        }

        let (transport, stderr) = TokioChildProcess::builder(command)
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                loop {
                    match reader.next_line().await {
                        Ok(Some(line)) => {
                            info!("upstream stderr ({program_name}): {line}");
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!("failed to read upstream stderr ({program_name}): {error}");
                            break;
                        }
                    }
                }
            });
        }

        Ok(Self::with_pending(
            server_name,
            PendingTransport::ChildProcess(transport),
        ))
    }

    /// Streamable-HTTP (and SSE — rmcp negotiates the stream) client.
    /// `bearer_token`, extra headers, and the session-forwarding id are all
    /// fixed at construction; reconnecting with a fresh token means building
    /// a new client, which keeps token selection in the caller's hands.
    pub fn new_streamable_http_client(
        server_name: &str,
        url: &str,
        bearer_token: Option<&str>,
        http_headers: Option<&HashMap<String, String>>,
        session_id: Option<&str>,
    ) -> Result<Self, UpstreamClientError> {
        let mut default_headers = HeaderMap::new();
        if let Some(headers) = http_headers {
            for (name, value) in headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|err| UpstreamClientError::Transport(err.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|err| UpstreamClientError::Transport(err.to_string()))?;
                default_headers.insert(name, value);
            }
        }
        if let Some(session_id) = session_id {
            let value = HeaderValue::from_str(session_id)
                .map_err(|err| UpstreamClientError::Transport(err.to_string()))?;
            default_headers.insert(HeaderName::from_static(SESSION_HEADER), value);
        }
        if let Some(token) = bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| UpstreamClientError::Transport(err.to_string()))?;
            value.set_sensitive(true);
            default_headers.insert(AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()
            .map_err(|err| UpstreamClientError::Transport(err.to_string()))?;
        let config = StreamableHttpClientTransportConfig::with_uri(url.to_string());
        let transport = StreamableHttpClientTransport::with_client(http_client, config);

        Ok(Self::with_pending(
            server_name,
            PendingTransport::StreamableHttp { transport },
        ))
    }

    fn with_pending(server_name: &str, transport: PendingTransport) -> Self {
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        Self {
            server_name: server_name.to_string(),
            state: Mutex::new(ClientState::Connecting {
                transport: Some(transport),
            }),
            notifications: Mutex::new(Some(notification_rx)),
            notification_tx,
        }
    }

    /// Performs the MCP initialization handshake.
    /// https://modelcontextprotocol.io/specification/2025-06-18/basic/lifecycle#initialization
    pub async fn initialize(
        &self,
        params: InitializeRequestParam,
        timeout: Option<Duration>,
    ) -> Result<InitializeResult, UpstreamClientError> {
        let handler = NotifyingClientHandler::new(
            &self.server_name,
            params,
            self.notification_tx.clone(),
        );

        let pending = {
            let mut guard = self.state.lock().await;
            match &mut *guard {
                ClientState::Connecting { transport } => transport
                    .take()
                    .ok_or(UpstreamClientError::AlreadyInitialized)?,
                ClientState::Ready { .. } => {
                    return Err(UpstreamClientError::AlreadyInitialized);
                }
                ClientState::Closed => return Err(UpstreamClientError::NotInitialized),
            }
        };

        let handshake = async {
            match pending {
                PendingTransport::ChildProcess(transport) => {
                    serve_client(handler, transport).await
                }
                PendingTransport::StreamableHttp { transport } => {
                    serve_client(handler, transport).await
                }
            }
        };

        let service = match timeout {
            Some(duration) => time::timeout(duration, handshake)
                .await
                .map_err(|_| UpstreamClientError::HandshakeTimeout(duration))?
                .map_err(|err| classify_handshake_error(&err))?,
            None => handshake
                .await
                .map_err(|err| classify_handshake_error(&err))?,
        };

        let server_info = service
            .peer()
            .peer_info()
            .cloned()
            .ok_or_else(|| {
                UpstreamClientError::Handshake(
                    "handshake succeeded but server info was missing".to_string(),
                )
            })?;

        let mut guard = self.state.lock().await;
        *guard = ClientState::Ready {
            service: Arc::new(service),
            server_info: server_info.clone(),
        };
        Ok(server_info)
    }

    /// The stream of catalog-change notifications. Yields once; the
    /// supervising service owns the receiver for the connection's lifetime.
    pub async fn take_notifications(
        &self,
    ) -> Option<mpsc::UnboundedReceiver<UpstreamNotification>> {
        self.notifications.lock().await.take()
    }

    /// Server info cached from the handshake.
    pub async fn server_info(&self) -> Option<InitializeResult> {
        match &*self.state.lock().await {
            ClientState::Ready { server_info, .. } => Some(server_info.clone()),
            _ => None,
        }
    }

    pub async fn list_tools(
        &self,
        params: Option<PaginatedRequestParam>,
        timeout: Option<Duration>,
    ) -> Result<ListToolsResult, UpstreamClientError> {
        let service = self.service().await?;
        run_with_timeout(service.list_tools(params), timeout, "tools/list").await
    }

    pub async fn list_resources(
        &self,
        params: Option<PaginatedRequestParam>,
        timeout: Option<Duration>,
    ) -> Result<ListResourcesResult, UpstreamClientError> {
        let service = self.service().await?;
        run_with_timeout(service.list_resources(params), timeout, "resources/list").await
    }

    pub async fn list_prompts(
        &self,
        params: Option<PaginatedRequestParam>,
        timeout: Option<Duration>,
    ) -> Result<ListPromptsResult, UpstreamClientError> {
        let service = self.service().await?;
        run_with_timeout(service.list_prompts(params), timeout, "prompts/list").await
    }

    pub async fn call_tool(
        &self,
        name: String,
        arguments: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<CallToolResult, UpstreamClientError> {
        let service = self.service().await?;
        let arguments = match arguments {
            Some(Value::Object(map)) => Some(map),
            Some(other) => return Err(UpstreamClientError::InvalidArguments(other.to_string())),
            None => None,
        };
        let params = CallToolRequestParam {
            name: name.into(),
            arguments,
        };
        run_with_timeout(service.call_tool(params), timeout, "tools/call").await
    }

    pub async fn read_resource(
        &self,
        params: ReadResourceRequestParam,
        timeout: Option<Duration>,
    ) -> Result<ReadResourceResult, UpstreamClientError> {
        let service = self.service().await?;
        run_with_timeout(service.read_resource(params), timeout, "resources/read").await
    }

    pub async fn get_prompt(
        &self,
        params: GetPromptRequestParam,
        timeout: Option<Duration>,
    ) -> Result<GetPromptResult, UpstreamClientError> {
        let service = self.service().await?;
        run_with_timeout(service.get_prompt(params), timeout, "prompts/get").await
    }

    /// Tears the connection down. In-flight calls observe a cancellation.
    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        if let ClientState::Ready { service, .. } = &*guard {
            service.cancellation_token().cancel();
        }
        *guard = ClientState::Closed;
    }

    async fn service(
        &self,
    ) -> Result<Arc<RunningService<RoleClient, NotifyingClientHandler>>, UpstreamClientError> {
        match &*self.state.lock().await {
            ClientState::Ready { service, .. } => Ok(Arc::clone(service)),
            ClientState::Connecting { .. } | ClientState::Closed => {
                Err(UpstreamClientError::NotInitialized)
            }
        }
    }
}

fn classify_handshake_error(err: &(dyn std::error::Error + 'static)) -> UpstreamClientError {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>()
            && reqwest_err.status() == Some(reqwest::StatusCode::UNAUTHORIZED)
        {
            return UpstreamClientError::AuthorizationRequired;
        }
        if err.to_string().contains("401 Unauthorized") {
            return UpstreamClientError::AuthorizationRequired;
        }
        current = err.source();
    }
    UpstreamClientError::Handshake(err.to_string())
}

async fn run_with_timeout<T, F>(
    fut: F,
    timeout: Option<Duration>,
    operation: &'static str,
) -> Result<T, UpstreamClientError>
where
    F: Future<Output = Result<T, rmcp::ServiceError>>,
{
    let result = match timeout {
        Some(duration) => time::timeout(duration, fut)
            .await
            .map_err(|_| UpstreamClientError::Timeout {
                operation,
                timeout: duration,
            })?,
        None => fut.await,
    };
    result.map_err(|err| UpstreamClientError::from_service_error(operation, err))
}
