//! Reference HTTP server for the Stratus control-plane protocol v1.
//!
//! Serves the routes listed in [`stratus_remote::protocol`] on top of an
//! [`InMemoryControlPlane`], so the HTTP client and the orchestrator can be
//! exercised end to end without a cloud account.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;
use stratus_remote::protocol::{
    asset_digest, decode_segment, BootstrapBody, DeployBody, DestroyBody, DiffBody,
    UpdateCodeBody,
};
use stratus_remote::{CloudClient, InMemoryControlPlane, RemoteError, PROTOCOL_VERSION};
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, info, warn};

/// A parsed request route, with path segments percent-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    Health,
    Account,
    Bootstrap,
    Stack(Cow<'a, str>),
    Deploy(Cow<'a, str>),
    Diff(Cow<'a, str>),
    Destroy(Cow<'a, str>),
    Object {
        bucket: Cow<'a, str>,
        key: Cow<'a, str>,
    },
    Asset(Cow<'a, str>),
    FunctionCode,
}

/// Match a method and URL path (query string ignored) against the protocol
/// routes. Segments are split before decoding, so an escaped `/` stays part
/// of its segment; anything that does not decode to UTF-8 matches nothing.
pub fn parse_route<'a>(method: &Method, url: &'a str) -> Option<Route<'a>> {
    let path = url.split('?').next().unwrap_or(url);
    let path = path.strip_prefix('/')?;
    let (head, rest) = match path.find('/') {
        Some(idx) => (&path[..idx], Some(&path[idx + 1..])),
        None => (path, None),
    };

    match (method, head, rest) {
        (Method::Get, "health", None) => Some(Route::Health),
        (Method::Get, "account", None) => Some(Route::Account),
        (Method::Post, "bootstrap", None) => Some(Route::Bootstrap),
        (Method::Post, "functions", Some("code")) => Some(Route::FunctionCode),
        (Method::Put, "assets", Some(digest)) if !digest.is_empty() && !digest.contains('/') => {
            Some(Route::Asset(decode_segment(digest)?))
        }
        (Method::Put, "objects", Some(rest)) => {
            let (bucket, key) = rest.split_once('/')?;
            if bucket.is_empty() || key.is_empty() {
                return None;
            }
            Some(Route::Object {
                bucket: decode_segment(bucket)?,
                key: decode_segment(key)?,
            })
        }
        (method, "stacks", Some(rest)) => {
            let route = match (method, rest.split_once('/')) {
                (Method::Get, None) if !rest.is_empty() => Route::Stack(decode_segment(rest)?),
                (Method::Post, Some((name, "deploy"))) => Route::Deploy(decode_segment(name)?),
                (Method::Post, Some((name, "diff"))) => Route::Diff(decode_segment(name)?),
                (Method::Post, Some((name, "destroy"))) => Route::Destroy(decode_segment(name)?),
                _ => return None,
            };
            Some(route)
        }
        _ => None,
    }
}

/// HTTP status for a control-plane failure.
pub fn status_for(err: &RemoteError) -> u16 {
    match err {
        RemoteError::NotFound(_) => 404,
        RemoteError::Credentials(_) => 403,
        RemoteError::UnknownStack(_) | RemoteError::Asset { .. } | RemoteError::Rejected { .. } => {
            422
        }
        RemoteError::Serialization(_) | RemoteError::Config(_) => 400,
        RemoteError::Io(_) | RemoteError::Http(_) => 500,
    }
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_json(req: tiny_http::Request, value: &impl Serialize) {
    match serde_json::to_vec(value) {
        Ok(json) => match Header::from_bytes("Content-Type", "application/json") {
            Ok(header) => {
                let _ = req.respond(Response::from_data(json).with_header(header));
            }
            Err(()) => {
                let _ = req.respond(Response::from_data(json));
            }
        },
        Err(e) => respond_err(req, 500, &format!("serialization error: {e}")),
    }
}

fn respond_result<T: Serialize>(req: tiny_http::Request, result: Result<T, RemoteError>) {
    match result {
        Ok(value) => respond_json(req, &value),
        Err(e) => {
            warn!("request failed: {e}");
            respond_err(req, status_for(&e), &e.to_string());
        }
    }
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

fn read_json<T: DeserializeOwned>(req: &mut tiny_http::Request) -> Result<T, RemoteError> {
    let body = read_body(req).ok_or_else(|| RemoteError::Http("read error".to_owned()))?;
    serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))
}

fn header_value<'r>(req: &'r tiny_http::Request, name: &'static str) -> Option<&'r str> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.as_str())
}

fn status(value: &'static str) -> serde_json::Value {
    serde_json::json!({ "status": value })
}

/// The control plane behind the HTTP routes.
pub struct ControlPlaneService {
    plane: Arc<InMemoryControlPlane>,
    auth_token: Option<String>,
}

impl ControlPlaneService {
    pub fn new(plane: Arc<InMemoryControlPlane>) -> Self {
        Self {
            plane,
            auth_token: None,
        }
    }

    /// Require `Authorization: Bearer <token>` on every route but `/health`.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn plane(&self) -> &Arc<InMemoryControlPlane> {
        &self.plane
    }

    fn authorized(&self, req: &tiny_http::Request) -> bool {
        let Some(ref token) = self.auth_token else {
            return true;
        };
        header_value(req, "Authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|given| given == token)
    }

    /// Handle a single HTTP request, dispatching to the matching route.
    pub fn handle_request(&self, mut req: tiny_http::Request) {
        let method = req.method().clone();
        let url = req.url().to_owned();
        debug!("{method} {url}");

        let Some(route) = parse_route(&method, &url) else {
            respond_err(req, 404, "not found");
            return;
        };
        if route == Route::Health {
            respond_json(req, &status("ok"));
            return;
        }
        let unsupported = header_value(&req, "X-Stratus-Protocol")
            .filter(|v| *v != PROTOCOL_VERSION.to_string())
            .map(|v| format!("unsupported protocol version {v}"));
        if let Some(msg) = unsupported {
            respond_err(req, 400, &msg);
            return;
        }
        if !self.authorized(&req) {
            respond_err(req, 401, "unauthorized");
            return;
        }
        if let Some(role) = header_value(&req, "X-Stratus-Assume-Role") {
            debug!("{method} {url} on behalf of {role}");
        }

        let plane = &self.plane;
        match route {
            Route::Health => respond_json(req, &status("ok")),
            Route::Account => respond_result(req, plane.default_account()),
            Route::Bootstrap => {
                let result = read_json::<BootstrapBody>(&mut req)
                    .and_then(|body| plane.bootstrap_environment(&body.target, &body.params));
                respond_result(req, result);
            }
            Route::Stack(name) => match plane.describe_stack(&name) {
                Ok(state) if state.exists => respond_json(req, &state),
                Ok(_) => respond_err(req, 404, &format!("stack {name} does not exist")),
                Err(e) => respond_err(req, status_for(&e), &e.to_string()),
            },
            Route::Deploy(name) => {
                let result = read_json::<DeployBody>(&mut req).and_then(|body| {
                    if body.template.stack_name != name {
                        return Err(RemoteError::UnknownStack(body.template.stack_name));
                    }
                    info!("deploying stack {name}");
                    plane.apply_template(&body.template, body.role_arn.as_deref())
                });
                respond_result(req, result.map(|()| status("deployed")));
            }
            Route::Diff(name) => {
                let result = read_json::<DiffBody>(&mut req).and_then(|body| {
                    if body.template.stack_name != name {
                        return Err(RemoteError::UnknownStack(body.template.stack_name));
                    }
                    plane.diff_template(&body.template)
                });
                respond_result(req, result);
            }
            Route::Destroy(name) => {
                let result = read_json::<DestroyBody>(&mut req).and_then(|body| {
                    info!("destroying stack {name}");
                    plane.remove_stack(&name, &body.options)
                });
                respond_result(req, result.map(|()| status("destroyed")));
            }
            Route::Object { bucket, key } => {
                let Some(body) = read_body(&mut req) else {
                    respond_err(req, 500, "read error");
                    return;
                };
                info!("PUT object {bucket}/{key}: {} bytes", body.len());
                respond_result(
                    req,
                    plane.put_object(&bucket, &key, &body).map(|()| status("ok")),
                );
            }
            Route::Asset(digest) => {
                let Some(body) = read_body(&mut req) else {
                    respond_err(req, 500, "read error");
                    return;
                };
                if asset_digest(&body) != digest {
                    respond_err(req, 400, "asset digest mismatch");
                    return;
                }
                info!("PUT asset {digest}: {} bytes", body.len());
                respond_result(
                    req,
                    plane.store_asset(&digest, &body).map(|()| status("ok")),
                );
            }
            Route::FunctionCode => {
                let result = read_json::<UpdateCodeBody>(&mut req).and_then(|body| {
                    info!("updating code of {}", body.function);
                    plane.update_function_code(&body.function, &body.bucket, &body.key)
                });
                respond_result(req, result.map(|()| status("updated")));
            }
        }
    }
}

/// Start the server loop, blocking the current thread.
pub fn run_server(
    service: &ControlPlaneService,
    addr: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::http(addr)?;
    for request in server.incoming_requests() {
        service.handle_request(request);
    }
    Ok(())
}

/// A test helper that starts a control-plane server on a random port in a
/// background thread.
///
/// Drop the `TestServer` to stop accepting requests (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub plane: Arc<InMemoryControlPlane>,
    server: Arc<Server>,
    _handle: std::thread::JoinHandle<()>,
}

impl TestServer {
    pub fn start() -> Self {
        Self::start_with(ControlPlaneService::new(Arc::new(
            InMemoryControlPlane::new(),
        )))
    }

    /// Bind `127.0.0.1:0` (random port) and serve `service`.
    pub fn start_with(service: ControlPlaneService) -> Self {
        let server =
            Arc::new(Server::http("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");
        let plane = Arc::clone(service.plane());

        let srv = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in srv.incoming_requests() {
                service.handle_request(request);
            }
        });

        Self {
            url,
            port,
            plane,
            server,
            _handle: handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
    }
}
