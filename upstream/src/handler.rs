use rmcp::ClientHandler;
use rmcp::RoleClient;
use rmcp::model::CancelledNotificationParam;
use rmcp::model::ClientInfo;
use rmcp::model::CreateElicitationRequestParam;
use rmcp::model::CreateElicitationResult;
use rmcp::model::ElicitationAction;
use rmcp::model::LoggingLevel;
use rmcp::model::LoggingMessageNotificationParam;
use rmcp::model::ProgressNotificationParam;
use rmcp::model::ResourceUpdatedNotificationParam;
use rmcp::service::NotificationContext;
use rmcp::service::RequestContext;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Server-initiated change notifications the gateway reacts to. Everything
/// else an upstream sends is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamNotification {
    ToolListChanged,
    ResourceListChanged,
    PromptListChanged,
    ResourceUpdated { uri: String },
}

/// rmcp client handler for one upstream connection: forwards catalog-change
/// notifications into a channel drained by the supervising service and logs
/// the rest at levels matching their severity.
#[derive(Debug, Clone)]
pub(crate) struct NotifyingClientHandler {
    server_name: String,
    client_info: ClientInfo,
    notifications: UnboundedSender<UpstreamNotification>,
}

impl NotifyingClientHandler {
    pub(crate) fn new(
        server_name: &str,
        client_info: ClientInfo,
        notifications: UnboundedSender<UpstreamNotification>,
    ) -> Self {
        Self {
            server_name: server_name.to_string(),
            client_info,
            notifications,
        }
    }

    fn forward(&self, notification: UpstreamNotification) {
        // The receiver disappears when the service is stopping; nothing to do.
        let _ = self.notifications.send(notification);
    }
}

impl ClientHandler for NotifyingClientHandler {
    async fn create_elicitation(
        &self,
        request: CreateElicitationRequestParam,
        _context: RequestContext<RoleClient>,
    ) -> Result<CreateElicitationResult, rmcp::ErrorData> {
        let message = match &request {
            CreateElicitationRequestParam::FormElicitationParams { message, .. } => message,
            CreateElicitationRequestParam::UrlElicitationParams { message, .. } => message,
        };
        info!(
            "upstream `{}` requested elicitation ({}); the gateway does not forward elicitations, declining",
            self.server_name, message
        );
        Ok(CreateElicitationResult {
            action: ElicitationAction::Decline,
            content: None,
        })
    }

    async fn on_cancelled(
        &self,
        params: CancelledNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        info!(
            "upstream `{}` cancelled request {} (reason: {:?})",
            self.server_name, params.request_id, params.reason
        );
    }

    async fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        debug!(
            "upstream `{}` progress (token: {:?}, progress: {}, total: {:?})",
            self.server_name, params.progress_token, params.progress, params.total
        );
    }

    async fn on_resource_updated(
        &self,
        params: ResourceUpdatedNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        self.forward(UpstreamNotification::ResourceUpdated { uri: params.uri });
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward(UpstreamNotification::ResourceListChanged);
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward(UpstreamNotification::ToolListChanged);
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.forward(UpstreamNotification::PromptListChanged);
    }

    fn get_info(&self) -> ClientInfo {
        self.client_info.clone()
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let LoggingMessageNotificationParam {
            level,
            logger,
            data,
        } = params;
        let server = self.server_name.as_str();
        let logger = logger.as_deref();
        match level {
            LoggingLevel::Emergency
            | LoggingLevel::Alert
            | LoggingLevel::Critical
            | LoggingLevel::Error => {
                error!("upstream `{server}` log (logger: {logger:?}): {data}");
            }
            LoggingLevel::Warning => {
                warn!("upstream `{server}` log (logger: {logger:?}): {data}");
            }
            LoggingLevel::Notice | LoggingLevel::Info => {
                info!("upstream `{server}` log (logger: {logger:?}): {data}");
            }
            LoggingLevel::Debug => {
                debug!("upstream `{server}` log (logger: {logger:?}): {data}");
            }
        }
    }
}
