use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;

use crate::error::AuthError;
use crate::tokens::StoredToken;

/// Safety margin subtracted from `expires_in` when computing the absolute
/// expiry, so a token is never presented right at the wire deadline.
const EXPIRY_SKEW_SECS: i64 = 10;

/// Successful response from the token endpoint (RFC 6749 §5.1).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Stateless token-endpoint client: code exchange and refresh, no retries.
/// Retry and backoff policy belong to the callers.
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
        }
    }

    /// Exchanges an authorization code (+ PKCE verifier) for a stored token
    /// bound to `endpoint`.
    #[allow(clippy::too_many_arguments)]
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        issuer_url: &str,
        endpoint: &str,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
        scopes: Option<Vec<String>>,
    ) -> Result<StoredToken, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("code_verifier", code_verifier),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.client_id),
        ];
        let response = self.post_token(token_endpoint, &params).await?;
        Ok(assemble_token(response, issuer_url, endpoint, None, scopes))
    }

    /// Refreshes `previous`. Fields the response omits (`refresh_token`,
    /// `id_token`) are carried over from the prior record so SSO continuity
    /// survives rotation.
    pub async fn refresh(
        &self,
        token_endpoint: &str,
        previous: &StoredToken,
    ) -> Result<StoredToken, AuthError> {
        let refresh_token =
            previous
                .refresh_token
                .as_deref()
                .ok_or_else(|| AuthError::Expired {
                    endpoint: previous.server_url.clone(),
                })?;
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
        ];
        let response = self.post_token(token_endpoint, &params).await?;
        Ok(assemble_token(
            response,
            &previous.issuer_url,
            &previous.server_url,
            Some(previous),
            previous.scopes.clone(),
        ))
    }

    async fn post_token(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let response = self.http.post(token_endpoint).form(params).send().await?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(AuthError::from);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<TokenErrorBody>(&body) {
            Ok(body) => Err(AuthError::Rejected {
                error: body.error,
                error_description: body.error_description,
            }),
            Err(_) => Err(AuthError::Failed {
                reason: format!("token endpoint returned {status}"),
            }),
        }
    }
}

fn assemble_token(
    response: TokenResponse,
    issuer_url: &str,
    endpoint: &str,
    previous: Option<&StoredToken>,
    scopes: Option<Vec<String>>,
) -> StoredToken {
    let expires_in = response.expires_in.unwrap_or(3600) as i64;
    let expires_at = Utc::now() + Duration::seconds((expires_in - EXPIRY_SKEW_SECS).max(0));
    let scopes = response
        .scope
        .map(|scope| scope.split_whitespace().map(str::to_string).collect())
        .or(scopes);

    StoredToken {
        access_token: response.access_token,
        refresh_token: response
            .refresh_token
            .or_else(|| previous.and_then(|prev| prev.refresh_token.clone())),
        id_token: response
            .id_token
            .or_else(|| previous.and_then(|prev| prev.id_token.clone())),
        token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
        expires_at,
        issuer_url: issuer_url.to_string(),
        server_url: endpoint.to_string(),
        scopes,
    }
}
