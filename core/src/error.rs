use thiserror::Error;

/// Failure taxonomy surfaced to MCP clients. Layers below return their own
/// typed errors; the multiplexer translates them into these kinds at the
/// session boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no tool, resource, or prompt named `{name}`")]
    NotFound { name: String },

    #[error("upstream `{upstream}` is not ready ({state})")]
    UpstreamNotReady { upstream: String, state: String },

    #[error("upstream `{upstream}` is unreachable: {reason}")]
    UpstreamUnreachable { upstream: String, reason: String },

    #[error("call to upstream `{upstream}` timed out")]
    UpstreamTimedOut { upstream: String },

    #[error("upstream `{upstream}` crashed: {reason}")]
    UpstreamCrashed { upstream: String, reason: String },

    /// The client can initiate a login against `issuer` and retry.
    #[error("authentication required for upstream `{upstream}` (issuer: {issuer})")]
    AuthRequired { upstream: String, issuer: String },

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("invalid request: {reason}")]
    Invalid { reason: String },

    #[error("internal gateway error: {reason}")]
    Internal { reason: String },
}

impl GatewayError {
    /// Stable machine-readable kind, carried in the MCP error `data` payload.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::UpstreamNotReady { .. } => "upstream_not_ready",
            GatewayError::UpstreamUnreachable { .. } => "upstream_unreachable",
            GatewayError::UpstreamTimedOut { .. } => "upstream_timed_out",
            GatewayError::UpstreamCrashed { .. } => "upstream_crashed",
            GatewayError::AuthRequired { .. } => "auth_required",
            GatewayError::AuthFailed { .. } => "auth_failed",
            GatewayError::Invalid { .. } => "invalid",
            GatewayError::Internal { .. } => "internal",
        }
    }
}

/// Coarse buckets for connection failures. Diagnostic only: nothing branches
/// on these besides log and status text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Tls,
    Dns,
    Network,
    Timeout,
    Unknown,
}

impl ConnectionErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionErrorKind::Tls => "tls",
            ConnectionErrorKind::Dns => "dns",
            ConnectionErrorKind::Network => "network",
            ConnectionErrorKind::Timeout => "timeout",
            ConnectionErrorKind::Unknown => "unknown",
        }
    }
}

/// Buckets a connection failure by walking its source chain. A certificate
/// problem anywhere in the chain wins over the outer wrapper's shape.
pub fn classify_connection_error(err: &(dyn std::error::Error + 'static)) -> ConnectionErrorKind {
    let mut tls = false;
    let mut dns = false;
    let mut network = false;
    let mut timeout = false;

    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(err) = current {
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
            timeout |= reqwest_err.is_timeout();
            network |= reqwest_err.is_connect();
        }
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            match io_err.kind() {
                std::io::ErrorKind::TimedOut => timeout = true,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::NotConnected => network = true,
                _ => {}
            }
        }

        let text = err.to_string().to_ascii_lowercase();
        tls |= text.contains("certificate") || text.contains("tls") || text.contains("ssl");
        dns |= text.contains("dns")
            || text.contains("failed to lookup")
            || text.contains("name or service not known")
            || text.contains("nodename nor servname");
        timeout |= text.contains("timed out") || text.contains("timeout");

        current = err.source();
    }

    if tls {
        ConnectionErrorKind::Tls
    } else if dns {
        ConnectionErrorKind::Dns
    } else if timeout {
        ConnectionErrorKind::Timeout
    } else if network {
        ConnectionErrorKind::Network
    } else {
        ConnectionErrorKind::Unknown
    }
}

/// Human-oriented description for status lines and logs.
pub fn describe_connection_error(
    err: &(dyn std::error::Error + 'static),
    endpoint: &str,
) -> String {
    let kind = classify_connection_error(err);
    match kind {
        ConnectionErrorKind::Tls => {
            format!("TLS failure connecting to {endpoint}: {err}")
        }
        ConnectionErrorKind::Dns => {
            format!("DNS resolution failed for {endpoint}: {err}")
        }
        ConnectionErrorKind::Network => {
            format!("network error connecting to {endpoint}: {err}")
        }
        ConnectionErrorKind::Timeout => {
            format!("timed out connecting to {endpoint}: {err}")
        }
        ConnectionErrorKind::Unknown => format!("error connecting to {endpoint}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use pretty_assertions::assert_eq;

    use super::ConnectionErrorKind;
    use super::classify_connection_error;

    #[derive(Debug)]
    struct Wrapper {
        message: &'static str,
        source: Option<Box<dyn std::error::Error + 'static>>,
    }

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for Wrapper {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.source.as_deref()
        }
    }

    #[test]
    fn certificate_causes_classify_as_tls_regardless_of_wrapper() {
        let err = Wrapper {
            message: "transport error",
            source: Some(Box::new(Wrapper {
                message: "invalid peer certificate: expired",
                source: None,
            })),
        };
        assert_eq!(
            classify_connection_error(&err),
            ConnectionErrorKind::Tls
        );
    }

    #[test]
    fn tls_wins_over_other_signals_in_the_chain() {
        let err = Wrapper {
            message: "connection timed out",
            source: Some(Box::new(Wrapper {
                message: "certificate verify failed",
                source: None,
            })),
        };
        assert_eq!(classify_connection_error(&err), ConnectionErrorKind::Tls);
    }

    #[test]
    fn io_kinds_map_to_network_and_timeout() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            classify_connection_error(&refused),
            ConnectionErrorKind::Network
        );

        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(
            classify_connection_error(&timed_out),
            ConnectionErrorKind::Timeout
        );
    }

    #[test]
    fn dns_failures_classify_as_dns() {
        let err = Wrapper {
            message: "failed to lookup address information",
            source: None,
        };
        assert_eq!(classify_connection_error(&err), ConnectionErrorKind::Dns);
    }

    #[test]
    fn unrecognized_errors_are_unknown() {
        let err = Wrapper {
            message: "something odd",
            source: None,
        };
        assert_eq!(
            classify_connection_error(&err),
            ConnectionErrorKind::Unknown
        );
    }
}
