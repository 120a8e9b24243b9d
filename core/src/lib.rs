mod catalog;
mod config_types;
mod env;
mod error;
mod events;
pub mod upstream;

pub use catalog::Catalog;
pub use catalog::CatalogDetail;
pub use catalog::CatalogItem;
pub use catalog::CatalogKind;
pub use catalog::UpstreamCatalog;
pub use config_types::GatewayConfig;
pub use config_types::TransportKind;
pub use config_types::UpstreamConfig;
pub use config_types::UpstreamTransportConfig;
pub use config_types::validate_upstream_name;
pub use env::AuthMode;
pub use env::EnvOverrides;
pub use env::env_overrides;
pub use error::ConnectionErrorKind;
pub use error::GatewayError;
pub use error::classify_connection_error;
pub use error::describe_connection_error;
pub use events::EventBus;
pub use events::GatewayEvent;
pub use upstream::catalog_service::CatalogService;
pub use upstream::manager::ReconcilePlan;
pub use upstream::manager::ReconcileSummary;
pub use upstream::manager::UpstreamInfo;
pub use upstream::manager::UpstreamManager;
pub use upstream::manager::plan_reconcile;
pub use upstream::service::DEFAULT_STARTUP_TIMEOUT;
pub use upstream::service::DEFAULT_TOOL_TIMEOUT;
pub use upstream::service::UpstreamService;
pub use upstream::service::UpstreamStatus;
pub use upstream::state::UpstreamLifecycle;
