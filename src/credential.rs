/// Identifies which of the three credential kinds a request authenticated
/// with. Each carries the raw token as presented by the client, so the
/// `CredentialRegistry` can look it up without re-parsing.
///
/// Grounded on the teacher's tagged middleware-config style
/// (`middleware/builtin/basic_auth.rs`), generalized from a single
/// username/password pair to three disjoint token spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// Full-access SDK key, presented server-side only.
    Server(String),
    /// Mobile SDK key, presented by mobile/desktop clients.
    Mobile(String),
    /// Client-side environment id, embedded in the URL path, never secret.
    Browser(String),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Server(_) => "server",
            Credential::Mobile(_) => "mobile",
            Credential::Browser(_) => "browser",
        }
    }

    pub fn token(&self) -> &str {
        match self {
            Credential::Server(t) | Credential::Mobile(t) | Credential::Browser(t) => t,
        }
    }
}

/// Extracts a server/mobile credential from an `Authorization` header value,
/// accepting both the bare token and LaunchDarkly's historical
/// `api_key <token>` form.
pub fn parse_authorization_header(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.strip_prefix("api_key ") {
        Some(rest) => Some(rest.trim()).filter(|s| !s.is_empty()),
        None => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_token() {
        assert_eq!(parse_authorization_header("sdk-abc123"), Some("sdk-abc123"));
    }

    #[test]
    fn parses_api_key_prefixed_token() {
        assert_eq!(
            parse_authorization_header("api_key sdk-abc123"),
            Some("sdk-abc123")
        );
    }

    #[test]
    fn rejects_empty_header() {
        assert_eq!(parse_authorization_header(""), None);
        assert_eq!(parse_authorization_header("api_key "), None);
    }
}
