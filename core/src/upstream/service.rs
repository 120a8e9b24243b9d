//! Supervision of a single upstream: one writer task owns the lifecycle
//! state machine; everything else observes snapshots through a watch
//! channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use muster_oauth::AuthRegistry;
use muster_upstream::UpstreamClient;
use muster_upstream::UpstreamClientError;
use muster_upstream::UpstreamNotification;
use rand::Rng;
use rmcp::model::ClientCapabilities;
use rmcp::model::Implementation;
use rmcp::model::InitializeRequestParam;
use rmcp::model::PaginatedRequestParam;
use rmcp::model::ProtocolVersion;
use rmcp::model::ServerCapabilities;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::catalog::Catalog;
use crate::catalog::UpstreamCatalog;
use crate::config_types::UpstreamConfig;
use crate::config_types::UpstreamTransportConfig;
use crate::events::EventBus;
use crate::events::GatewayEvent;
use crate::upstream::state::UpstreamLifecycle;

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_GRACE: Duration = Duration::from_secs(5);

const BACKOFF_INITIAL_MS: u64 = 200;
const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Exponential backoff with ±10% jitter, capped.
pub(crate) fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_FACTOR.powi(attempt.saturating_sub(1) as i32);
    let base = (BACKOFF_INITIAL_MS as f64 * exp) as u64;
    let jitter = rand::rng().random_range(0.9..1.1);
    Duration::from_millis((base as f64 * jitter) as u64).min(BACKOFF_CAP)
}

#[derive(Debug, Clone)]
pub struct UpstreamStatus {
    pub lifecycle: UpstreamLifecycle,
    pub consecutive_failures: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_retry_after: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl UpstreamStatus {
    fn initial() -> Self {
        Self {
            lifecycle: UpstreamLifecycle::Pending,
            consecutive_failures: 0,
            last_attempt: None,
            next_retry_after: None,
            message: None,
        }
    }
}

enum Command {
    Start,
    Stop { done: oneshot::Sender<()> },
    Restart,
}

/// Handle to one supervised upstream. Cheap to clone via `Arc`; all
/// mutation goes through the writer task.
pub struct UpstreamService {
    name: String,
    config: UpstreamConfig,
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<UpstreamStatus>,
    catalog: Arc<StdRwLock<Option<UpstreamCatalog>>>,
    client_slot: Arc<RwLock<Option<Arc<UpstreamClient>>>>,
    task: StdRwLock<Option<JoinHandle<()>>>,
}

impl UpstreamService {
    pub fn spawn(
        name: String,
        config: UpstreamConfig,
        auth: Arc<AuthRegistry>,
        bus: EventBus,
        catalog_watch: watch::Receiver<Arc<Catalog>>,
    ) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(UpstreamStatus::initial());
        let catalog = Arc::new(StdRwLock::new(None));
        let client_slot = Arc::new(RwLock::new(None));

        let task = ServiceTask {
            name: name.clone(),
            config: config.clone(),
            auth,
            bus,
            catalog_watch,
            status_tx,
            catalog: Arc::clone(&catalog),
            client_slot: Arc::clone(&client_slot),
            lifecycle: UpstreamLifecycle::Pending,
            desired_running: config.auto_start,
            failures: 0,
            health_failures: 0,
            notifications: None,
            timer: None,
        };
        let handle = tokio::spawn(task.run(command_rx));

        Arc::new(Self {
            name,
            config,
            commands: command_tx,
            status_rx,
            catalog,
            client_slot,
            task: StdRwLock::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    pub fn status(&self) -> UpstreamStatus {
        self.status_rx.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<UpstreamStatus> {
        self.status_rx.clone()
    }

    /// The items this upstream currently contributes; `None` outside the
    /// running state.
    pub fn catalog_snapshot(&self) -> Option<UpstreamCatalog> {
        self.catalog
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub async fn client(&self) -> Option<Arc<UpstreamClient>> {
        self.client_slot.read().await.clone()
    }

    pub fn tool_timeout(&self) -> Duration {
        self.config.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT)
    }

    /// Idempotent: starting an upstream that is starting or running is a
    /// no-op.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    pub fn restart(&self) {
        let _ = self.commands.send(Command::Restart);
    }

    /// Graceful stop: resolves once the upstream reached `Stopped`.
    pub async fn stop(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Stop { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stops the upstream and ends its writer task.
    pub async fn shutdown(&self) {
        self.stop().await;
        let handle = self
            .task
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

/// Allow/deny filter over native tool names.
#[derive(Default, Clone)]
pub(crate) struct ToolFilter {
    enabled: Option<HashSet<String>>,
    disabled: HashSet<String>,
}

impl ToolFilter {
    pub(crate) fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            enabled: config
                .enabled_tools
                .as_ref()
                .map(|tools| tools.iter().cloned().collect()),
            disabled: config
                .disabled_tools
                .as_ref()
                .map(|tools| tools.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn allows(&self, tool_name: &str) -> bool {
        if let Some(enabled) = &self.enabled
            && !enabled.contains(tool_name)
        {
            return false;
        }
        !self.disabled.contains(tool_name)
    }
}

enum ConnectFailure {
    AuthRequired,
    Transient(String),
    Terminal(String),
}

enum TimerPurpose {
    Retry,
    HealthProbe,
}

struct ServiceTask {
    name: String,
    config: UpstreamConfig,
    auth: Arc<AuthRegistry>,
    bus: EventBus,
    catalog_watch: watch::Receiver<Arc<Catalog>>,
    status_tx: watch::Sender<UpstreamStatus>,
    catalog: Arc<StdRwLock<Option<UpstreamCatalog>>>,
    client_slot: Arc<RwLock<Option<Arc<UpstreamClient>>>>,
    lifecycle: UpstreamLifecycle,
    desired_running: bool,
    failures: u32,
    health_failures: u32,
    notifications: Option<mpsc::UnboundedReceiver<UpstreamNotification>>,
    timer: Option<(Instant, TimerPurpose)>,
}

impl ServiceTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        self.advance().await;

        loop {
            let waiting = self.lifecycle == UpstreamLifecycle::Waiting;
            let timer_deadline = self.timer.as_ref().map(|(at, _)| *at);

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    match command {
                        Command::Start => {
                            self.desired_running = true;
                            self.advance().await;
                        }
                        Command::Stop { done } => {
                            self.desired_running = false;
                            self.stop_now(UpstreamLifecycle::Stopped).await;
                            let _ = done.send(());
                        }
                        Command::Restart => {
                            self.stop_now(UpstreamLifecycle::Stopped).await;
                            self.desired_running = true;
                            self.advance().await;
                        }
                    }
                }
                _ = sleep_until_opt(timer_deadline), if timer_deadline.is_some() => {
                    match self.timer.take() {
                        Some((_, TimerPurpose::Retry)) => {
                            if self.lifecycle == UpstreamLifecycle::Retrying {
                                self.transition(UpstreamLifecycle::Starting, None);
                                self.try_connect().await;
                            }
                        }
                        Some((_, TimerPurpose::HealthProbe)) => {
                            if self.lifecycle.is_running() {
                                self.health_probe().await;
                            }
                        }
                        None => {}
                    }
                }
                changed = self.catalog_watch.changed(), if waiting => {
                    if changed.is_err() {
                        break;
                    }
                    if self.dependencies_satisfied() {
                        info!("upstream `{}` dependencies satisfied", self.name);
                        self.transition(UpstreamLifecycle::Starting, None);
                        self.try_connect().await;
                    }
                }
                notification = recv_opt(&mut self.notifications), if self.lifecycle.is_running() => {
                    match notification {
                        Some(notification) => self.handle_notification(notification).await,
                        None => {
                            // The connection's notification stream closed
                            // underneath us: treat as a transport drop.
                            self.connection_lost("notification stream closed").await;
                        }
                    }
                }
            }
        }

        self.stop_now(UpstreamLifecycle::Stopped).await;
    }

    /// Moves a stationary upstream toward its desired state.
    async fn advance(&mut self) {
        use UpstreamLifecycle::*;
        match (self.lifecycle, self.desired_running) {
            (Pending, false) => self.transition(Stopped, Some("auto_start is disabled".into())),
            (Pending | Stopped | Failed | AuthRequired, true) => {
                if self.dependencies_satisfied() {
                    self.transition(Starting, None);
                    self.try_connect().await;
                } else {
                    self.transition(Waiting, Some("waiting for required tools".into()));
                }
            }
            _ => {}
        }
    }

    fn dependencies_satisfied(&self) -> bool {
        let catalog = self.catalog_watch.borrow();
        self.config
            .required_tools
            .iter()
            .all(|tool| catalog.resolve(tool).is_some())
    }

    async fn try_connect(&mut self) {
        self.status_tx.send_modify(|status| {
            status.last_attempt = Some(Utc::now());
        });

        match self.connect_and_discover().await {
            Ok(()) => {
                self.failures = 0;
                self.health_failures = 0;
                self.transition(UpstreamLifecycle::Running, None);
                self.schedule_health_probe();
                self.bus.publish(GatewayEvent::CatalogChanged {
                    upstream: self.name.clone(),
                });
            }
            Err(ConnectFailure::AuthRequired) => {
                self.clear_connection().await;
                self.probe_auth_challenge().await;
                self.transition(
                    UpstreamLifecycle::AuthRequired,
                    Some("upstream requires authentication; run a login".into()),
                );
            }
            Err(ConnectFailure::Terminal(reason)) => {
                self.clear_connection().await;
                warn!("upstream `{}` failed permanently: {reason}", self.name);
                self.transition(UpstreamLifecycle::Failed, Some(reason));
            }
            Err(ConnectFailure::Transient(reason)) => {
                self.clear_connection().await;
                self.failures += 1;
                let delay = backoff(self.failures);
                debug!(
                    "upstream `{}` connect failed (attempt {}): {reason}; retrying in {delay:?}",
                    self.name, self.failures
                );
                self.timer = Some((Instant::now() + delay, TimerPurpose::Retry));
                self.status_tx.send_modify(|status| {
                    status.next_retry_after = Utc::now()
                        .checked_add_signed(
                            chrono::Duration::from_std(delay).unwrap_or_default(),
                        );
                });
                self.transition(UpstreamLifecycle::Retrying, Some(reason));
            }
        }
    }

    async fn connect_and_discover(&mut self) -> Result<(), ConnectFailure> {
        let client = Arc::new(self.build_client().await?);
        let startup_timeout = self.config.startup_timeout.or(Some(DEFAULT_STARTUP_TIMEOUT));

        let init = client
            .initialize(client_info(), startup_timeout)
            .await
            .map_err(classify_client_error)?;

        self.notifications = client.take_notifications().await;
        let snapshot = discover_catalog(
            &self.name,
            &client,
            &init.capabilities,
            &ToolFilter::from_config(&self.config),
            self.config.tool_prefix.clone(),
            startup_timeout,
        )
        .await
        .map_err(classify_client_error)?;

        info!(
            "upstream `{}` is up: {} tools, {} resources, {} prompts",
            self.name,
            snapshot.tools.len(),
            snapshot.resources.len(),
            snapshot.prompts.len()
        );
        *self
            .catalog
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot);
        *self.client_slot.write().await = Some(client);
        Ok(())
    }

    async fn build_client(&self) -> Result<UpstreamClient, ConnectFailure> {
        match &self.config.transport {
            UpstreamTransportConfig::Stdio { command, args, env } => {
                UpstreamClient::new_stdio_client(
                    &self.name,
                    command.clone().into(),
                    args.iter().map(Into::into).collect(),
                    env.clone(),
                )
                .await
                .map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound => {
                        ConnectFailure::Terminal(format!("command `{command}` not found"))
                    }
                    _ => ConnectFailure::Transient(err.to_string()),
                })
            }
            UpstreamTransportConfig::StreamableHttp {
                url,
                bearer_token_env_var,
                http_headers,
            }
            | UpstreamTransportConfig::Sse {
                url,
                bearer_token_env_var,
                http_headers,
            } => {
                let bearer = self
                    .resolve_bearer(url, bearer_token_env_var.as_deref())
                    .await?;
                UpstreamClient::new_streamable_http_client(
                    &self.name,
                    url,
                    bearer.as_deref(),
                    http_headers.as_ref(),
                    None,
                )
                .map_err(|err| ConnectFailure::Transient(err.to_string()))
            }
        }
    }

    /// The gateway's own token for this endpoint, if any. Missing auth is
    /// not an error here: the connect proceeds unauthenticated and the
    /// upstream's 401 moves the machine to `AuthRequired`.
    async fn resolve_bearer(
        &self,
        url: &str,
        bearer_token_env_var: Option<&str>,
    ) -> Result<Option<String>, ConnectFailure> {
        if let Some(env_var) = bearer_token_env_var {
            return match std::env::var(env_var) {
                Ok(value) if !value.is_empty() => Ok(Some(value)),
                Ok(_) => Err(ConnectFailure::Terminal(format!(
                    "environment variable {env_var} for upstream `{}` is empty",
                    self.name
                ))),
                Err(_) => Err(ConnectFailure::Terminal(format!(
                    "environment variable {env_var} for upstream `{}` is not set",
                    self.name
                ))),
            };
        }

        match self.auth.for_endpoint(url).await {
            Ok(endpoint_auth) => match endpoint_auth.bearer_token().await {
                Ok(token) => Ok(Some(token)),
                Err(err) if err.is_transient() => Err(ConnectFailure::Transient(err.to_string())),
                Err(_) => Ok(None),
            },
            Err(err) => Err(ConnectFailure::Terminal(err.to_string())),
        }
    }

    /// Caches the endpoint's challenge (and issuer) so status output and the
    /// session error path can point at the right login target.
    async fn probe_auth_challenge(&self) {
        let Some(url) = self.config.transport.url() else {
            return;
        };
        if let Ok(endpoint_auth) = self.auth.for_endpoint(url).await
            && let Err(err) = endpoint_auth.check_connection().await
        {
            debug!("auth probe for upstream `{}` failed: {err}", self.name);
        }
    }

    async fn health_probe(&mut self) {
        let client = self.client_slot.read().await.clone();
        let Some(client) = client else {
            self.connection_lost("client dropped").await;
            return;
        };

        match client.list_tools(None, Some(HEALTH_PROBE_TIMEOUT)).await {
            Ok(_) => {
                self.health_failures = 0;
                self.schedule_health_probe();
            }
            Err(err) if err.is_auth_required() => {
                self.clear_connection().await;
                self.probe_auth_challenge().await;
                self.transition(
                    UpstreamLifecycle::AuthRequired,
                    Some("authorization expired".into()),
                );
            }
            Err(err) => {
                self.health_failures += 1;
                let threshold = self
                    .config
                    .unhealthy_threshold
                    .unwrap_or(DEFAULT_UNHEALTHY_THRESHOLD);
                debug!(
                    "health probe {}/{threshold} failed for upstream `{}`: {err}",
                    self.health_failures, self.name
                );
                if self.health_failures >= threshold {
                    self.connection_lost("health probes exhausted").await;
                } else {
                    self.schedule_health_probe();
                }
            }
        }
    }

    async fn connection_lost(&mut self, reason: &str) {
        warn!("upstream `{}` connection lost: {reason}", self.name);
        self.clear_connection().await;
        self.failures += 1;
        let delay = backoff(self.failures);
        self.timer = Some((Instant::now() + delay, TimerPurpose::Retry));
        self.status_tx.send_modify(|status| {
            status.next_retry_after =
                Utc::now().checked_add_signed(chrono::Duration::from_std(delay).unwrap_or_default());
        });
        self.transition(UpstreamLifecycle::Retrying, Some(reason.to_string()));
        self.bus.publish(GatewayEvent::CatalogChanged {
            upstream: self.name.clone(),
        });
    }

    async fn handle_notification(&mut self, notification: UpstreamNotification) {
        debug!("upstream `{}` notification: {notification:?}", self.name);
        let client = self.client_slot.read().await.clone();
        let Some(client) = client else {
            return;
        };
        let Some(init) = client.server_info().await else {
            return;
        };
        match discover_catalog(
            &self.name,
            &client,
            &init.capabilities,
            &ToolFilter::from_config(&self.config),
            self.config.tool_prefix.clone(),
            Some(self.config.tool_timeout.unwrap_or(DEFAULT_TOOL_TIMEOUT)),
        )
        .await
        {
            Ok(snapshot) => {
                *self
                    .catalog
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot);
                self.bus.publish(GatewayEvent::CatalogChanged {
                    upstream: self.name.clone(),
                });
            }
            Err(err) => {
                warn!(
                    "failed to rediscover catalog for upstream `{}`: {err}",
                    self.name
                );
            }
        }
    }

    async fn stop_now(&mut self, target: UpstreamLifecycle) {
        use UpstreamLifecycle::*;
        self.timer = None;
        if matches!(self.lifecycle, Stopped | Pending) {
            if self.lifecycle == Pending {
                self.transition(Stopped, None);
            }
            return;
        }
        let had_catalog = self.has_catalog();
        if self.lifecycle != Stopping {
            self.transition(Stopping, None);
        }
        let deadline = tokio::time::timeout(STOP_GRACE, self.clear_connection());
        if deadline.await.is_err() {
            warn!("upstream `{}` did not stop within {STOP_GRACE:?}", self.name);
        }
        self.transition(target, None);
        if had_catalog {
            self.bus.publish(GatewayEvent::CatalogChanged {
                upstream: self.name.clone(),
            });
        }
    }

    fn has_catalog(&self) -> bool {
        self.catalog
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    async fn clear_connection(&mut self) {
        self.notifications = None;
        self.health_failures = 0;
        *self
            .catalog
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        let client = self.client_slot.write().await.take();
        if let Some(client) = client {
            client.close().await;
        }
    }

    fn schedule_health_probe(&mut self) {
        let interval = self
            .config
            .health_interval
            .unwrap_or(DEFAULT_HEALTH_INTERVAL);
        self.timer = Some((Instant::now() + interval, TimerPurpose::HealthProbe));
    }

    fn transition(&mut self, to: UpstreamLifecycle, message: Option<String>) {
        let from = self.lifecycle;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            // Unknown edges indicate a supervisor bug; refuse to take them.
            warn!(
                "refusing illegal lifecycle transition {from:?} -> {to:?} for upstream `{}`",
                self.name
            );
            return;
        }
        debug!("upstream `{}`: {from:?} -> {to:?}", self.name);
        self.lifecycle = to;
        let failures = self.failures;
        self.status_tx.send_modify(|status| {
            status.lifecycle = to;
            status.consecutive_failures = failures;
            status.message = message;
            if to == UpstreamLifecycle::Running {
                status.consecutive_failures = 0;
                status.next_retry_after = None;
            }
        });
        self.bus.publish(GatewayEvent::UpstreamStateChanged {
            upstream: self.name.clone(),
            lifecycle: to,
        });
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn recv_opt(
    rx: &mut Option<mpsc::UnboundedReceiver<UpstreamNotification>>,
) -> Option<UpstreamNotification> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn classify_client_error(err: UpstreamClientError) -> ConnectFailure {
    match err {
        UpstreamClientError::AuthorizationRequired => ConnectFailure::AuthRequired,
        UpstreamClientError::InvalidArguments(reason) => ConnectFailure::Terminal(reason),
        UpstreamClientError::AlreadyInitialized | UpstreamClientError::NotInitialized => {
            ConnectFailure::Terminal(err.to_string())
        }
        other => ConnectFailure::Transient(other.to_string()),
    }
}

fn client_info() -> InitializeRequestParam {
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

/// Pulls the full tool/resource/prompt surface, following pagination
/// cursors and honoring the per-upstream tool filter. Capabilities the
/// server did not advertise are not queried.
async fn discover_catalog(
    name: &str,
    client: &UpstreamClient,
    capabilities: &ServerCapabilities,
    filter: &ToolFilter,
    tool_prefix: Option<String>,
    timeout: Option<Duration>,
) -> Result<UpstreamCatalog, UpstreamClientError> {
    let mut snapshot = UpstreamCatalog {
        upstream: name.to_string(),
        tool_prefix,
        ..Default::default()
    };

    if capabilities.tools.is_some() {
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.clone().map(|cursor| PaginatedRequestParam {
                meta: None,
                cursor: Some(cursor),
            });
            let page = client.list_tools(params, timeout).await?;
            snapshot.tools.extend(
                page.tools
                    .into_iter()
                    .filter(|tool| filter.allows(tool.name.as_ref())),
            );
            match page.next_cursor {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }
    }

    if capabilities.resources.is_some() {
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.clone().map(|cursor| PaginatedRequestParam {
                meta: None,
                cursor: Some(cursor),
            });
            let page = client.list_resources(params, timeout).await?;
            snapshot.resources.extend(page.resources);
            match page.next_cursor {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }
    }

    if capabilities.prompts.is_some() {
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.clone().map(|cursor| PaginatedRequestParam {
                meta: None,
                cursor: Some(cursor),
            });
            let page = client.list_prompts(params, timeout).await?;
            snapshot.prompts.extend(page.prompts);
            match page.next_cursor {
                Some(next) if Some(&next) != cursor.as_ref() => cursor = Some(next),
                _ => break,
            }
        }
    }

    Ok(snapshot)
}
