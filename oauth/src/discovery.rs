use serde::Deserialize;
use serde::Serialize;

use crate::error::AuthError;

/// RFC 8414 authorization-server metadata, as served from
/// `{issuer}/.well-known/oauth-authorization-server`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,
}

/// Fetches issuer metadata. A missing or unparseable discovery document is
/// terminal for the login attempt.
pub async fn discover_issuer(
    client: &reqwest::Client,
    issuer: &str,
) -> Result<IssuerMetadata, AuthError> {
    let issuer = issuer.trim_end_matches('/');
    let url = format!("{issuer}/.well-known/oauth-authorization-server");

    let response = client.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(AuthError::Discovery {
            issuer: issuer.to_string(),
            reason: format!("{url} returned {}", response.status()),
        });
    }
    response
        .json::<IssuerMetadata>()
        .await
        .map_err(|err| AuthError::Discovery {
            issuer: issuer.to_string(),
            reason: format!("invalid metadata document: {err}"),
        })
}
