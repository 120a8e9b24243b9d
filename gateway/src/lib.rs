mod errors;
mod handler;
mod meta;
mod notify;
mod server;
mod session;

pub use errors::to_error_data;
pub use handler::GatewayHandler;
pub use handler::GatewayState;
pub use handler::InboundIdentity;
pub use notify::spawn_notifier;
pub use server::GatewayServer;
pub use session::SessionRegistry;
pub use session::SessionState;
