use muster_core::GatewayError;
use rmcp::model::ErrorData;
use serde_json::json;

/// Maps the gateway failure taxonomy onto MCP wire errors. The structured
/// `data` payload carries the machine-readable kind (and the issuer URL for
/// auth failures) so clients can react without parsing messages.
pub fn to_error_data(err: GatewayError) -> ErrorData {
    let message = err.to_string();
    match &err {
        GatewayError::NotFound { name } => ErrorData::invalid_params(
            message,
            Some(json!({ "kind": err.kind(), "name": name })),
        ),
        GatewayError::Invalid { .. } => {
            ErrorData::invalid_params(message, Some(json!({ "kind": err.kind() })))
        }
        GatewayError::AuthRequired { upstream, issuer } => ErrorData::invalid_request(
            message,
            Some(json!({
                "kind": err.kind(),
                "upstream": upstream,
                "issuer": issuer,
            })),
        ),
        GatewayError::AuthFailed { .. } => {
            ErrorData::invalid_request(message, Some(json!({ "kind": err.kind() })))
        }
        GatewayError::UpstreamNotReady { upstream, state } => ErrorData::internal_error(
            message,
            Some(json!({
                "kind": err.kind(),
                "upstream": upstream,
                "state": state,
            })),
        ),
        GatewayError::UpstreamUnreachable { upstream, .. }
        | GatewayError::UpstreamTimedOut { upstream }
        | GatewayError::UpstreamCrashed { upstream, .. } => ErrorData::internal_error(
            message,
            Some(json!({ "kind": err.kind(), "upstream": upstream })),
        ),
        GatewayError::Internal { .. } => {
            ErrorData::internal_error(message, Some(json!({ "kind": err.kind() })))
        }
    }
}

#[cfg(test)]
mod tests {
    use muster_core::GatewayError;
    use pretty_assertions::assert_eq;

    use super::to_error_data;

    #[test]
    fn auth_required_carries_the_issuer() {
        let data = to_error_data(GatewayError::AuthRequired {
            upstream: "notes".to_string(),
            issuer: "https://issuer.example.com".to_string(),
        });
        let payload = data.data.expect("data payload");
        assert_eq!(payload["kind"], "auth_required");
        assert_eq!(payload["issuer"], "https://issuer.example.com");
        assert!(data.message.contains("issuer.example.com"));
    }

    #[test]
    fn not_found_names_the_item() {
        let data = to_error_data(GatewayError::NotFound {
            name: "ghost_tool".to_string(),
        });
        let payload = data.data.expect("data payload");
        assert_eq!(payload["kind"], "not_found");
        assert_eq!(payload["name"], "ghost_tool");
    }
}
