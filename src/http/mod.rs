mod auth;
mod eval;
mod goals;

pub use goals::GoalsCache;

use crate::environment::EnvironmentHandle;
use crate::events::EventForwarder;
use crate::registry::CredentialRegistry;
use crate::store::{Kind, Store};
use auth::{browser_credential, header_credential};
use base64::Engine;
use bytes::Bytes;
use futures::future::join_all;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

type RspBody = BoxBody<Bytes, hyper::Error>;

/// Top-level request dispatcher. Mirrors the teacher's `match (method, path)`
/// admin-API dispatch, generalized from a fixed set of `/api/*` routes to
/// the credential-scoped SDK routes described in §6.
pub struct Router {
    registry: Arc<CredentialRegistry>,
    goals: GoalsCache,
    events: EventForwarder,
}

impl Router {
    pub fn new(registry: Arc<CredentialRegistry>, goals: GoalsCache, events: EventForwarder) -> Self {
        Self {
            registry,
            goals,
            events,
        }
    }

    pub async fn handle(&self, req: Request<Incoming>) -> Response<RspBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let is_report = method.as_str() == "REPORT";

        match (&method, path.as_str()) {
            (&Method::GET, "/status") => self.status().await,
            (&Method::GET, "/flags") => self.stream_flags(&req, false).await,
            (&Method::POST, "/bulk") => self.bulk(req).await,
            _ if is_report && path == "/sdk/eval/user" => self.eval_user_report(req, false).await,
            _ if is_report && path == "/msdk/eval/user" => self.eval_user_report(req, true).await,
            (&Method::GET, p) if p.starts_with("/sdk/eval/users/") => {
                let user_b64 = &p["/sdk/eval/users/".len()..];
                self.eval_user_header(&req, false, user_b64).await
            }
            (&Method::GET, p) if p.starts_with("/msdk/eval/users/") => {
                let user_b64 = &p["/msdk/eval/users/".len()..];
                self.eval_user_header(&req, true, user_b64).await
            }
            _ if is_report && path.starts_with("/sdk/eval/") && path.ends_with("/user") => {
                let env_id = &path["/sdk/eval/".len()..path.len() - "/user".len()];
                self.eval_browser_report(req, env_id).await
            }
            (&Method::GET, p) if p.starts_with("/sdk/eval/") => self.eval_browser(p).await,
            (&Method::GET, p) if p.starts_with("/sdk/goals/") => {
                let env_id = &p["/sdk/goals/".len()..];
                self.serve_goals(env_id).await
            }
            _ => self.not_found(),
        }
    }

    async fn status(&self) -> Response<RspBody> {
        let handles: Vec<_> = self.registry.environments().cloned().collect();
        let statuses = join_all(handles.iter().map(|handle| async move {
            let connected = handle.store.initialized().await;
            (handle.config.api_key.clone(), connected)
        }))
        .await;

        let all_connected = statuses.iter().all(|(_, connected)| *connected);
        let environments: serde_json::Map<String, serde_json::Value> = statuses
            .into_iter()
            .map(|(credential, connected)| {
                let status = if connected { "connected" } else { "disconnected" };
                (credential, json!({ "status": status }))
            })
            .collect();

        self.json_response(&json!({
            "environments": environments,
            "status": if all_connected { "healthy" } else { "degraded" },
        }))
    }

    async fn stream_flags(&self, req: &Request<Incoming>, mobile: bool) -> Response<RspBody> {
        let Some(credential) = header_credential(req, mobile) else {
            return self.unauthorized();
        };
        let Some(handle) = self.registry.resolve(&credential) else {
            return self.unauthorized();
        };

        // Subscribe before reading the snapshot: anything published in
        // between lands in `rx` and is merely replayed twice, rather than
        // being lost to a subscriber who missed both the snapshot and the
        // live broadcast for it.
        let rx = handle.publisher.subscribe();
        let initial = match initial_put_event(&handle).await {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "failed to build initial sse snapshot");
                return self.text_response(StatusCode::INTERNAL_SERVER_ERROR, "store error");
            }
        };

        let body = handle.publisher.stream_body(rx, initial);
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .header("cache-control", "no-cache")
            .header("access-control-allow-origin", "*")
            .body(body)
            .unwrap()
    }

    async fn bulk(&self, req: Request<Incoming>) -> Response<RspBody> {
        let Some(credential) = header_credential(&req, false) else {
            return self.unauthorized();
        };
        // `/bulk` is authorized against the event-handler map, not the
        // general server map (§4.4 step 6, §9): an environment with
        // `sendEvents` disabled has no handler registered here even though
        // its server credential resolves normally for every other route.
        if self.registry.resolve_event_handler(credential.token()).is_none() {
            return self.unauthorized();
        }

        let content_type = req
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return self.text_response(StatusCode::BAD_REQUEST, "invalid body"),
        };

        match self
            .events
            .forward(credential.token(), content_type.as_deref(), body)
            .await
        {
            Ok(status) => Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::ACCEPTED))
                .body(Self::empty_body())
                .unwrap(),
            Err(err) => {
                warn!(error = %err, "failed to forward events");
                Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body(Self::empty_body())
                    .unwrap()
            }
        }
    }

    async fn eval_user_header(
        &self,
        req: &Request<Incoming>,
        mobile: bool,
        user_b64: &str,
    ) -> Response<RspBody> {
        let Some(credential) = header_credential(req, mobile) else {
            return self.unauthorized();
        };
        let Some(handle) = self.registry.resolve(&credential) else {
            return self.unauthorized();
        };
        let user = match decode_user(user_b64) {
            Ok(user) => user,
            Err(message) => return self.malformed_user(message),
        };

        self.eval_response(&handle, &user).await
    }

    async fn eval_user_report(&self, req: Request<Incoming>, mobile: bool) -> Response<RspBody> {
        let Some(credential) = header_credential(&req, mobile) else {
            return self.unauthorized();
        };
        let Some(handle) = self.registry.resolve(&credential) else {
            return self.unauthorized();
        };
        if !is_json_content_type(&req) {
            return self.unsupported_media_type();
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return self.malformed_user("invalid request body".to_string()),
        };
        let user = match parse_user(&body) {
            Ok(user) => user,
            Err(message) => return self.malformed_user(message),
        };

        self.eval_response(&handle, &user).await
    }

    async fn eval_browser(&self, path: &str) -> Response<RspBody> {
        let rest = &path["/sdk/eval/".len()..];
        let Some((env_id, user_b64)) = rest.split_once("/users/") else {
            return self.not_found();
        };

        let Some(handle) = self.registry.resolve(&browser_credential(env_id)) else {
            return self.not_found();
        };
        let user = match decode_user(user_b64) {
            Ok(user) => user,
            Err(message) => return self.malformed_user(message),
        };

        self.eval_response(&handle, &user).await
    }

    async fn eval_browser_report(&self, req: Request<Incoming>, env_id: &str) -> Response<RspBody> {
        let Some(handle) = self.registry.resolve(&browser_credential(env_id)) else {
            return self.not_found();
        };
        if !is_json_content_type(&req) {
            return self.unsupported_media_type();
        }

        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return self.malformed_user("invalid request body".to_string()),
        };
        let user = match parse_user(&body) {
            Ok(user) => user,
            Err(message) => return self.malformed_user(message),
        };

        self.eval_response(&handle, &user).await
    }

    async fn eval_response(
        &self,
        handle: &Arc<EnvironmentHandle>,
        _user: &serde_json::Value,
    ) -> Response<RspBody> {
        match handle.store.all(Kind::Flags).await {
            Ok(flags) => self.json_response(&eval::evaluate_all(&flags)),
            Err(err) => {
                warn!(error = %err, "failed to read flags for evaluation");
                self.text_response(StatusCode::INTERNAL_SERVER_ERROR, "store error")
            }
        }
    }

    async fn serve_goals(&self, env_id: &str) -> Response<RspBody> {
        if self.registry.resolve(&browser_credential(env_id)).is_none() {
            return self.not_found();
        }

        match self.goals.fetch(env_id).await {
            Ok(goals) => {
                let mut builder = Response::builder()
                    .status(StatusCode::from_u16(goals.status).unwrap_or(StatusCode::BAD_GATEWAY))
                    .header("access-control-allow-origin", "*");
                if let Some(etag) = goals.etag {
                    builder = builder.header("etag", etag);
                }
                builder = builder.header(
                    "content-type",
                    goals.content_type.as_deref().unwrap_or("application/json"),
                );
                builder.body(Self::full_body(goals.body)).unwrap()
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch goals");
                Response::builder()
                    .status(StatusCode::BAD_GATEWAY)
                    .body(Self::empty_body())
                    .unwrap()
            }
        }
    }

    fn not_found(&self) -> Response<RspBody> {
        self.text_response(StatusCode::NOT_FOUND, "not found")
    }

    fn unauthorized(&self) -> Response<RspBody> {
        self.text_response(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    fn unsupported_media_type(&self) -> Response<RspBody> {
        self.text_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json",
        )
    }

    /// A malformed-user payload is the one error case the spec pins to a
    /// specific JSON shape (`{"message": ...}`), matching the upstream SDKs'
    /// own error body so they can surface it verbatim to callers.
    fn malformed_user(&self, detail: String) -> Response<RspBody> {
        let body = serde_json::to_string(&json!({ "message": detail }))
            .unwrap_or_else(|_| "{\"message\":\"invalid user\"}".to_string());
        Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .header("content-type", "application/json")
            .body(Self::full_body(body))
            .unwrap()
    }

    fn text_response(&self, status: StatusCode, message: &str) -> Response<RspBody> {
        Response::builder()
            .status(status)
            .header("content-type", "text/plain")
            .body(Self::full_body(message.to_string()))
            .unwrap()
    }

    fn json_response<T: Serialize>(&self, data: &T) -> Response<RspBody> {
        match serde_json::to_string(data) {
            Ok(json) => Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Self::full_body(json))
                .unwrap(),
            Err(_) => self.text_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization failed"),
        }
    }

    fn full_body<T: Into<Bytes>>(content: T) -> RspBody {
        Full::new(content.into())
            .map_err(|never: std::convert::Infallible| match never {})
            .boxed()
    }

    fn empty_body() -> RspBody {
        Empty::new()
            .map_err(|never: std::convert::Infallible| match never {})
            .boxed()
    }
}

async fn initial_put_event(handle: &EnvironmentHandle) -> anyhow::Result<crate::sse::SseEvent> {
    let mut data = serde_json::Map::new();
    for kind in Kind::ALL {
        let items = handle.store.all(kind).await?;
        data.insert(kind.as_str().to_string(), serde_json::to_value(items)?);
    }
    Ok(crate::sse::SseEvent::new(
        "put",
        json!({ "data": data }).to_string(),
    ))
}

fn is_json_content_type(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Validates a decoded user context against the one invariant the relay
/// enforces itself: a non-null `key` field. Everything else is opaque.
fn validate_user(value: serde_json::Value) -> Result<serde_json::Value, String> {
    match value.get("key") {
        Some(key) if !key.is_null() => Ok(value),
        _ => Err("User must have a 'key' attribute".to_string()),
    }
}

fn parse_user(body: &[u8]) -> Result<serde_json::Value, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| "invalid user payload".to_string())?;
    validate_user(value)
}

/// LaunchDarkly's browser/mobile SDKs base64url-encode the user JSON into
/// the path; some send it padded, some don't, so both are tried.
fn decode_user(user_b64: &str) -> Result<serde_json::Value, String> {
    let decoded = base64::engine::general_purpose::URL_SAFE
        .decode(user_b64)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(user_b64))
        .map_err(|_| "invalid user payload".to_string())?;
    let value: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|_| "invalid user payload".to_string())?;
    validate_user(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_padded_and_unpadded_user_payloads() {
        let user = json!({"key": "u1"});
        let padded = base64::engine::general_purpose::URL_SAFE.encode(user.to_string());
        let unpadded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(user.to_string());

        assert_eq!(decode_user(&padded), Ok(user.clone()));
        assert_eq!(decode_user(&unpadded), Ok(user));
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(decode_user("not-valid-base64!!").is_err());
    }

    #[test]
    fn rejects_user_missing_key_attribute() {
        let user = json!({"name": "no-key"});
        let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(user.to_string());
        assert_eq!(
            decode_user(&encoded),
            Err("User must have a 'key' attribute".to_string())
        );
    }
}
