use crate::credential::{parse_authorization_header, Credential};
use hyper::Request;

/// Pulls a server- or mobile-key credential out of the `Authorization`
/// header. Which kind it's treated as depends on the route: server routes
/// call `server`, mobile routes call `mobile`.
pub fn header_credential<B>(req: &Request<B>, mobile: bool) -> Option<Credential> {
    let raw = req.headers().get(hyper::header::AUTHORIZATION)?.to_str().ok()?;
    let token = parse_authorization_header(raw)?.to_string();
    Some(if mobile {
        Credential::Mobile(token)
    } else {
        Credential::Server(token)
    })
}

/// Browser-side routes carry the environment id as a URL path segment
/// instead of a header, since the value isn't a secret.
pub fn browser_credential(env_id: &str) -> Credential {
    Credential::Browser(env_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_server_credential_from_header() {
        let req = Request::builder()
            .header("Authorization", "sdk-key-123")
            .body(())
            .unwrap();
        assert_eq!(
            header_credential(&req, false),
            Some(Credential::Server("sdk-key-123".to_string()))
        );
    }

    #[test]
    fn reads_mobile_credential_when_flagged() {
        let req = Request::builder()
            .header("Authorization", "api_key mob-456")
            .body(())
            .unwrap();
        assert_eq!(
            header_credential(&req, true),
            Some(Credential::Mobile("mob-456".to_string()))
        );
    }

    #[test]
    fn missing_header_yields_none() {
        let req = Request::builder().body(()).unwrap();
        assert_eq!(header_credential(&req, false), None);
    }

    #[test]
    fn browser_credential_wraps_env_id() {
        assert_eq!(browser_credential("env-1"), Credential::Browser("env-1".to_string()));
    }
}
