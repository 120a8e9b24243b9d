/// Parsed `WWW-Authenticate: Bearer` challenge from a 401 response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: Option<String>,
    pub scope: Option<String>,
    /// Issuer URL named by the server (`authorization_server` or the
    /// shorthand `authz_server`).
    pub authorization_server: Option<String>,
    pub resource_metadata: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl BearerChallenge {
    /// Parses a `WWW-Authenticate` header value. Returns `None` unless the
    /// scheme is `Bearer`.
    pub fn parse(header: &str) -> Option<Self> {
        let rest = strip_bearer_scheme(header)?;

        let mut challenge = BearerChallenge::default();
        for (key, value) in parse_auth_params(rest) {
            match key.as_str() {
                "realm" => challenge.realm = Some(value),
                "scope" => challenge.scope = Some(value),
                "authorization_server" | "authz_server" | "authorization_uri" => {
                    challenge.authorization_server = Some(value);
                }
                "resource_metadata" => challenge.resource_metadata = Some(value),
                "error" => challenge.error = Some(value),
                "error_description" => challenge.error_description = Some(value),
                _ => {}
            }
        }
        Some(challenge)
    }
}

fn strip_bearer_scheme(header: &str) -> Option<&str> {
    let trimmed = header.trim();
    let scheme_len = "Bearer".len();
    if trimmed.len() < scheme_len || !trimmed[..scheme_len].eq_ignore_ascii_case("Bearer") {
        return None;
    }
    let rest = &trimmed[scheme_len..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim_start())
}

/// Splits `key="value", key2=value2` pairs, honoring quotes so commas inside
/// quoted values do not split a parameter.
fn parse_auth_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut push = |raw: &str, params: &mut Vec<(String, String)>| {
        if let Some((key, value)) = raw.split_once('=') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"').to_string();
            if !key.is_empty() {
                params.push((key, value));
            }
        }
    };

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => {
                push(&current, &mut params);
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    push(&current, &mut params);
    params
}
