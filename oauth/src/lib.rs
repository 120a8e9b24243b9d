mod challenge;
mod client;
mod discovery;
mod endpoint;
mod error;
mod login;
mod manager;
mod pkce;
mod store;
mod tokens;

pub use challenge::BearerChallenge;
pub use client::OAuthClient;
pub use client::TokenResponse;
pub use discovery::IssuerMetadata;
pub use discovery::discover_issuer;
pub use endpoint::normalize_endpoint;
pub use error::AuthError;
pub use login::DEFAULT_CALLBACK_PORT;
pub use login::LoginHandle;
pub use login::LoginOptions;
pub use login::begin_login;
pub use manager::AuthConfig;
pub use manager::AuthRegistry;
pub use manager::AuthState;
pub use manager::EndpointAuth;
pub use store::TokenStore;
pub use tokens::StoredToken;
