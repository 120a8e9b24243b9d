//! Upstream and gateway configuration types. The file format and schema
//! validation live in the loader (the CLI); these types only define what the
//! engine consumes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::Error as SerdeError;
use sha1::Digest;
use sha1::Sha1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamConfig {
    pub transport: UpstreamTransportConfig,

    /// When `false`, reconciliation constructs the upstream but leaves it
    /// stopped until an explicit start request.
    pub auto_start: bool,

    /// Prefix prepended to native tool names when building public names.
    pub tool_prefix: Option<String>,

    /// Public tool names that must exist in the live catalog before this
    /// upstream starts.
    pub required_tools: Vec<String>,

    /// Timeout for the transport connect + initialize handshake.
    pub startup_timeout: Option<Duration>,

    /// Per-call timeout for requests to this upstream.
    pub tool_timeout: Option<Duration>,

    pub enabled_tools: Option<Vec<String>>,
    pub disabled_tools: Option<Vec<String>>,

    /// OAuth scopes requested when logging in to this upstream.
    pub scopes: Option<Vec<String>>,

    /// Interval between health probes while running.
    pub health_interval: Option<Duration>,

    /// Consecutive failed probes before the connection is recycled.
    pub unhealthy_threshold: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamTransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
    },
    StreamableHttp {
        url: String,
        bearer_token_env_var: Option<String>,
        http_headers: Option<HashMap<String, String>>,
    },
    Sse {
        url: String,
        bearer_token_env_var: Option<String>,
        http_headers: Option<HashMap<String, String>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    StreamableHttp,
    Sse,
}

impl UpstreamTransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            UpstreamTransportConfig::Stdio { .. } => TransportKind::Stdio,
            UpstreamTransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
            UpstreamTransportConfig::Sse { .. } => TransportKind::Sse,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            UpstreamTransportConfig::Stdio { .. } => None,
            UpstreamTransportConfig::StreamableHttp { url, .. }
            | UpstreamTransportConfig::Sse { url, .. } => Some(url),
        }
    }
}

impl UpstreamConfig {
    /// Hash of the full spec; reconciliation treats any change as an update.
    pub fn spec_hash(&self) -> String {
        sha1_of_json(self)
    }

    /// Hash of the fields that require a restart to take effect. Prefix or
    /// filter changes rebuild the catalog without touching the process.
    pub fn launch_fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct LaunchFields<'a> {
            transport: &'a UpstreamTransportConfig,
            startup_timeout: Option<Duration>,
        }
        sha1_of_json(&LaunchFields {
            transport: &self.transport,
            startup_timeout: self.startup_timeout,
        })
    }
}

fn sha1_of_json<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")
}

impl<'de> Deserialize<'de> for UpstreamConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawUpstreamConfig {
            // stdio
            command: Option<String>,
            #[serde(default)]
            args: Option<Vec<String>>,
            #[serde(default)]
            env: Option<HashMap<String, String>>,

            // streamable_http / sse
            url: Option<String>,
            #[serde(default)]
            transport: Option<String>,
            #[serde(default)]
            bearer_token_env_var: Option<String>,
            #[serde(default)]
            http_headers: Option<HashMap<String, String>>,

            // shared
            #[serde(default)]
            auto_start: Option<bool>,
            #[serde(default)]
            tool_prefix: Option<String>,
            #[serde(default)]
            required_tools: Option<Vec<String>>,
            #[serde(default)]
            startup_timeout_sec: Option<f64>,
            #[serde(default)]
            tool_timeout_sec: Option<f64>,
            #[serde(default)]
            enabled_tools: Option<Vec<String>>,
            #[serde(default)]
            disabled_tools: Option<Vec<String>>,
            #[serde(default)]
            scopes: Option<Vec<String>>,
            #[serde(default)]
            health_interval_sec: Option<f64>,
            #[serde(default)]
            unhealthy_threshold: Option<u32>,
        }

        fn reject_if_set<E: SerdeError, T>(
            transport: &str,
            field: &str,
            value: Option<&T>,
        ) -> Result<(), E> {
            if value.is_none() {
                return Ok(());
            }
            Err(E::custom(format!("{field} is not supported for {transport}")))
        }

        fn duration_from_secs<E: SerdeError>(
            field: &str,
            secs: Option<f64>,
        ) -> Result<Option<Duration>, E> {
            secs.map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|err| E::custom(format!("invalid {field}: {err}")))
            })
            .transpose()
        }

        let raw = RawUpstreamConfig::deserialize(deserializer)?;

        let transport = match (&raw.command, &raw.url) {
            (Some(command), None) => {
                reject_if_set("stdio", "bearer_token_env_var", raw.bearer_token_env_var.as_ref())?;
                reject_if_set("stdio", "http_headers", raw.http_headers.as_ref())?;
                if let Some(kind) = raw.transport.as_deref()
                    && kind != "stdio"
                {
                    return Err(D::Error::custom(format!(
                        "transport `{kind}` conflicts with `command`"
                    )));
                }
                UpstreamTransportConfig::Stdio {
                    command: command.clone(),
                    args: raw.args.clone().unwrap_or_default(),
                    env: raw.env.clone(),
                }
            }
            (None, Some(url)) => {
                reject_if_set("http transports", "args", raw.args.as_ref())?;
                reject_if_set("http transports", "env", raw.env.as_ref())?;
                match raw.transport.as_deref() {
                    Some("sse") => UpstreamTransportConfig::Sse {
                        url: url.clone(),
                        bearer_token_env_var: raw.bearer_token_env_var.clone(),
                        http_headers: raw.http_headers.clone(),
                    },
                    None | Some("streamable_http") | Some("streamable-http") => {
                        UpstreamTransportConfig::StreamableHttp {
                            url: url.clone(),
                            bearer_token_env_var: raw.bearer_token_env_var.clone(),
                            http_headers: raw.http_headers.clone(),
                        }
                    }
                    Some(other) => {
                        return Err(D::Error::custom(format!("unknown transport `{other}`")));
                    }
                }
            }
            (Some(_), Some(_)) => {
                return Err(D::Error::custom(
                    "specify either `command` or `url`, not both",
                ));
            }
            (None, None) => {
                return Err(D::Error::custom("one of `command` or `url` is required"));
            }
        };

        Ok(UpstreamConfig {
            transport,
            auto_start: raw.auto_start.unwrap_or(true),
            tool_prefix: raw.tool_prefix,
            required_tools: raw.required_tools.unwrap_or_default(),
            startup_timeout: duration_from_secs("startup_timeout_sec", raw.startup_timeout_sec)?,
            tool_timeout: duration_from_secs("tool_timeout_sec", raw.tool_timeout_sec)?,
            enabled_tools: raw.enabled_tools,
            disabled_tools: raw.disabled_tools,
            scopes: raw.scopes,
            health_interval: duration_from_secs("health_interval_sec", raw.health_interval_sec)?,
            unhealthy_threshold: raw.unhealthy_threshold,
        })
    }
}

/// Gateway listen configuration, produced by the external loader.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8090))
}

/// Upstream names become path segments and public-name prefixes, so they are
/// restricted the same way tool names are.
pub fn validate_upstream_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 64 {
        return Err(format!("invalid upstream name `{name}`: length must be 1..=64"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(format!(
            "invalid upstream name `{name}`: must match ^[a-zA-Z0-9_-]+$"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::UpstreamConfig;
    use super::UpstreamTransportConfig;
    use super::validate_upstream_name;

    #[test]
    fn deserializes_stdio_config() {
        let config: UpstreamConfig = serde_json::from_value(serde_json::json!({
            "command": "mcp-fs",
            "args": ["--root", "/tmp"],
            "tool_prefix": "fs_",
            "startup_timeout_sec": 15,
        }))
        .unwrap();

        match &config.transport {
            UpstreamTransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "mcp-fs");
                assert_eq!(args, &vec!["--root".to_string(), "/tmp".to_string()]);
            }
            other => panic!("expected stdio transport, got {other:?}"),
        }
        assert!(config.auto_start);
        assert_eq!(config.tool_prefix.as_deref(), Some("fs_"));
        assert_eq!(config.startup_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn deserializes_http_and_sse_configs() {
        let http: UpstreamConfig = serde_json::from_value(serde_json::json!({
            "url": "https://api.example.com/mcp",
        }))
        .unwrap();
        assert!(matches!(
            http.transport,
            UpstreamTransportConfig::StreamableHttp { .. }
        ));

        let sse: UpstreamConfig = serde_json::from_value(serde_json::json!({
            "url": "https://api.example.com/sse",
            "transport": "sse",
            "auto_start": false,
        }))
        .unwrap();
        assert!(matches!(sse.transport, UpstreamTransportConfig::Sse { .. }));
        assert!(!sse.auto_start);
    }

    #[test]
    fn rejects_cross_transport_fields() {
        let err = serde_json::from_value::<UpstreamConfig>(serde_json::json!({
            "command": "mcp-fs",
            "http_headers": {"x": "y"},
        }))
        .unwrap_err();
        assert!(err.to_string().contains("not supported for stdio"));

        let err = serde_json::from_value::<UpstreamConfig>(serde_json::json!({
            "url": "https://api.example.com/mcp",
            "args": ["--x"],
        }))
        .unwrap_err();
        assert!(err.to_string().contains("not supported for http"));
    }

    #[test]
    fn rejects_ambiguous_and_empty_configs() {
        assert!(
            serde_json::from_value::<UpstreamConfig>(serde_json::json!({
                "command": "a",
                "url": "https://b",
            }))
            .is_err()
        );
        assert!(serde_json::from_value::<UpstreamConfig>(serde_json::json!({})).is_err());
    }

    #[test]
    fn spec_hash_tracks_every_field_but_launch_fingerprint_does_not() {
        let base: UpstreamConfig = serde_json::from_value(serde_json::json!({
            "url": "https://api.example.com/mcp",
        }))
        .unwrap();

        let mut prefixed = base.clone();
        prefixed.tool_prefix = Some("x_".to_string());
        assert_ne!(base.spec_hash(), prefixed.spec_hash());
        assert_eq!(base.launch_fingerprint(), prefixed.launch_fingerprint());

        let moved: UpstreamConfig = serde_json::from_value(serde_json::json!({
            "url": "https://other.example.com/mcp",
        }))
        .unwrap();
        assert_ne!(base.launch_fingerprint(), moved.launch_fingerprint());
    }

    #[test]
    fn upstream_name_validation() {
        assert!(validate_upstream_name("fs-tools_2").is_ok());
        assert!(validate_upstream_name("").is_err());
        assert!(validate_upstream_name("bad name").is_err());
        assert!(validate_upstream_name("dots.are.bad").is_err());
    }
}
