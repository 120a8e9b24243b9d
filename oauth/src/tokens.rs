use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// One persisted OAuth grant, keyed in the store by `server_url` (the
/// normalized endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub token_type: String,
    /// Wall-clock instant after which `access_token` is no longer valid.
    pub expires_at: DateTime<Utc>,
    pub issuer_url: String,
    pub server_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl StoredToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the token expires within `threshold` of `now` — the
    /// proactive-refresh window.
    pub fn expires_within(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        let threshold = Duration::from_std(threshold).unwrap_or_else(|_| Duration::seconds(60));
        now + threshold >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::StoredToken;

    fn token_expiring_in(secs: i64) -> StoredToken {
        StoredToken {
            access_token: "AT".to_string(),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(secs),
            issuer_url: "https://issuer.example.com".to_string(),
            server_url: "https://api.example.com".to_string(),
            scopes: None,
        }
    }

    #[test]
    fn expiry_windows() {
        let now = Utc::now();
        assert!(token_expiring_in(-5).is_expired(now));
        assert!(!token_expiring_in(300).is_expired(now));

        assert!(token_expiring_in(30).expires_within(now, Duration::from_secs(60)));
        assert!(!token_expiring_in(300).expires_within(now, Duration::from_secs(60)));
    }
}
