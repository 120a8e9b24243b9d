//! Environment overrides, read once at initialization.

use std::sync::LazyLock;

use tracing::warn;

pub const OAUTH_PORT_ENV: &str = "MUSTER_OAUTH_PORT";
pub const AUTH_MODE_ENV: &str = "MUSTER_AUTH_MODE";
pub const ENDPOINT_ENV: &str = "MUSTER_ENDPOINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Log in automatically when an upstream demands it.
    #[default]
    Auto,
    /// Surface the login URL but wait for the operator.
    Prompt,
    /// Never initiate logins; auth failures surface as errors.
    None,
}

#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub oauth_callback_port: Option<u16>,
    pub auth_mode: AuthMode,
    pub endpoint: Option<String>,
}

static ENV_OVERRIDES: LazyLock<EnvOverrides> = LazyLock::new(read_env);

/// Process-wide overrides; the environment is consulted exactly once.
pub fn env_overrides() -> &'static EnvOverrides {
    &ENV_OVERRIDES
}

fn read_env() -> EnvOverrides {
    let oauth_callback_port = std::env::var(OAUTH_PORT_ENV).ok().and_then(|raw| {
        match raw.parse::<u16>() {
            Ok(port) if port > 0 => Some(port),
            _ => {
                warn!("ignoring invalid {OAUTH_PORT_ENV}={raw}");
                None
            }
        }
    });

    let auth_mode = match std::env::var(AUTH_MODE_ENV).ok().as_deref() {
        None | Some("auto") => AuthMode::Auto,
        Some("prompt") => AuthMode::Prompt,
        Some("none") => AuthMode::None,
        Some(other) => {
            warn!("ignoring invalid {AUTH_MODE_ENV}={other}");
            AuthMode::Auto
        }
    };

    EnvOverrides {
        oauth_callback_port,
        auth_mode,
        endpoint: std::env::var(ENDPOINT_ENV).ok(),
    }
}
