use url::Url;

use crate::error::AuthError;

/// Normalize an MCP endpoint URL into the canonical form used as the token
/// storage and auth-state key: lowercased scheme + host (+ explicit port),
/// with trailing `/`, `/mcp`, and `/sse` suffixes stripped.
///
/// Normalization is idempotent: applying it to its own output is a no-op.
pub fn normalize_endpoint(raw: &str) -> Result<String, AuthError> {
    let url =
        Url::parse(raw.trim()).map_err(|_| AuthError::InvalidEndpoint(raw.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AuthError::InvalidEndpoint(raw.to_string()));
    }
    let host = url
        .host_str()
        .ok_or_else(|| AuthError::InvalidEndpoint(raw.to_string()))?
        .to_ascii_lowercase();

    let mut path = url.path();
    loop {
        let trimmed = path.trim_end_matches('/');
        let stripped = trimmed
            .strip_suffix("/mcp")
            .or_else(|| trimmed.strip_suffix("/sse"))
            .unwrap_or(trimmed);
        if stripped == path {
            break;
        }
        path = stripped;
    }

    let mut normalized = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(path);
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::normalize_endpoint;

    #[test]
    fn strips_mcp_suffix_and_trailing_slash() {
        assert_eq!(
            normalize_endpoint("https://h:1/mcp/").unwrap(),
            "https://h:1"
        );
        assert_eq!(normalize_endpoint("https://h:1").unwrap(), "https://h:1");
    }

    #[test]
    fn strips_sse_suffix() {
        assert_eq!(
            normalize_endpoint("https://api.example.com/sse").unwrap(),
            "https://api.example.com"
        );
    }

    #[test]
    fn keeps_non_transport_path_segments() {
        assert_eq!(
            normalize_endpoint("https://api.example.com/v1/mcp").unwrap(),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn repeated_suffixes_collapse_in_one_pass() {
        assert_eq!(
            normalize_endpoint("https://h/mcp/mcp/").unwrap(),
            "https://h"
        );
    }

    #[test]
    fn is_idempotent() {
        for raw in [
            "https://h:1/mcp/",
            "https://api.example.com/v1/mcp",
            "http://localhost:3000/sse",
            "https://H.Example.COM/MCP",
        ] {
            let once = normalize_endpoint(raw).unwrap();
            let twice = normalize_endpoint(&once).unwrap();
            assert_eq!(once, twice, "normalization of {raw} is not idempotent");
        }
    }

    #[test]
    fn lowercases_host_but_not_path() {
        assert_eq!(
            normalize_endpoint("https://H.Example.COM/Api/mcp").unwrap(),
            "https://h.example.com/Api"
        );
    }

    #[test]
    fn default_port_is_elided() {
        assert_eq!(
            normalize_endpoint("https://h:443/mcp").unwrap(),
            "https://h"
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(normalize_endpoint("ftp://example.com").is_err());
        assert!(normalize_endpoint("not a url").is_err());
    }
}
