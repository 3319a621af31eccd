use crate::diff::StackDiff;
use crate::protocol::{
    encode_key, encode_segment, select_stacks, stage_assets, BootstrapBody, DeployBody,
    DestroyBody, DiffBody, UpdateCodeBody,
};
use crate::{
    AccountInfo, BootstrapOutcome, BootstrapParams, CloudClient, Connector, ControlPlane,
    DestroyOptions, RemoteConfig, RemoteError, RemoteProfiles, RemoteStackState, SessionRequest,
    Toolkit,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use stratus_schema::{Assembly, DeploymentTarget};

/// Control plane reached over HTTP (protocol v1, see [`crate::protocol`]).
pub struct HttpControlPlane {
    config: RemoteConfig,
    assume_role: Option<String>,
    agent: ureq::Agent,
}

impl HttpControlPlane {
    pub fn new(config: RemoteConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self {
            config,
            assume_role: None,
            agent,
        }
    }

    /// Issue every request on behalf of `role_arn`.
    #[must_use]
    pub fn with_assumed_role(mut self, role_arn: Option<String>) -> Self {
        self.assume_role = role_arn;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.url, path.trim_start_matches('/'))
    }

    fn headers<B>(&self, mut req: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        req = req.header("X-Stratus-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        if let Some(ref role) = self.assume_role {
            req = req.header("X-Stratus-Assume-Role", role);
        }
        req
    }

    fn read_response(
        url: &str,
        result: Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<Vec<u8>, RemoteError> {
        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                return Err(RemoteError::NotFound(url.to_owned()));
            }
            Err(ureq::Error::StatusCode(401 | 403)) => {
                return Err(RemoteError::Credentials(format!("access denied for {url}")));
            }
            Err(ureq::Error::StatusCode(code)) => {
                return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
            }
            Err(e) => {
                return Err(RemoteError::Http(e.to_string()));
            }
        };

        let code = resp.status().as_u16();
        if code == 404 {
            return Err(RemoteError::NotFound(url.to_owned()));
        }
        if code >= 400 {
            return Err(RemoteError::Http(format!("HTTP {code} for {url}")));
        }

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(body)
    }

    fn do_get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.url(path);
        tracing::debug!("GET {url}");
        let req = self.headers(self.agent.get(&url));
        Self::read_response(&url, req.call())
    }

    fn do_put(&self, path: &str, data: &[u8]) -> Result<(), RemoteError> {
        let url = self.url(path);
        tracing::debug!("PUT {url} ({} bytes)", data.len());
        let req = self
            .headers(self.agent.put(&url))
            .header("Content-Type", "application/octet-stream");
        Self::read_response(&url, req.send(data)).map(|_| ())
    }

    fn do_post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RemoteError> {
        let url = self.url(path);
        let payload =
            serde_json::to_vec(body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        tracing::debug!("POST {url} ({} bytes)", payload.len());
        let req = self
            .headers(self.agent.post(&url))
            .header("Content-Type", "application/json");
        let body = Self::read_response(&url, req.send(&payload[..]))?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))
    }
}

fn stack_path(stack_name: &str, action: &str) -> String {
    format!("stacks/{}/{action}", encode_segment(stack_name))
}

impl Toolkit for HttpControlPlane {
    fn deploy(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
        role_arn: Option<&str>,
    ) -> Result<(), RemoteError> {
        for template in select_stacks(assembly, stack_names)? {
            let staged = stage_assets(template, |digest, data| {
                self.do_put(&format!("assets/{digest}"), data)
            })?;
            let body = DeployBody {
                template: staged,
                role_arn: role_arn.map(str::to_owned),
            };
            let _: serde_json::Value =
                self.do_post(&stack_path(&template.stack_name, "deploy"), &body)?;
        }
        Ok(())
    }

    fn diff(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
    ) -> Result<Vec<StackDiff>, RemoteError> {
        select_stacks(assembly, stack_names)?
            .into_iter()
            .map(|template| {
                let body = DiffBody {
                    template: template.clone(),
                };
                self.do_post(&stack_path(&template.stack_name, "diff"), &body)
            })
            .collect()
    }

    fn destroy(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
        options: &DestroyOptions,
    ) -> Result<(), RemoteError> {
        for template in select_stacks(assembly, stack_names)? {
            let body = DestroyBody {
                options: options.clone(),
            };
            let _: serde_json::Value =
                self.do_post(&stack_path(&template.stack_name, "destroy"), &body)?;
        }
        Ok(())
    }
}

impl CloudClient for HttpControlPlane {
    fn describe_stack(&self, name: &str) -> Result<RemoteStackState, RemoteError> {
        match self.do_get(&format!("stacks/{}", encode_segment(name))) {
            Ok(body) => serde_json::from_slice(&body)
                .map_err(|e| RemoteError::Serialization(e.to_string())),
            Err(RemoteError::NotFound(_)) => Ok(RemoteStackState::missing()),
            Err(e) => Err(e),
        }
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), RemoteError> {
        let path = format!("objects/{}/{}", encode_segment(bucket), encode_key(key));
        self.do_put(&path, data)
    }

    fn update_function_code(
        &self,
        identifier: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), RemoteError> {
        let body = UpdateCodeBody {
            function: identifier.to_owned(),
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        };
        let _: serde_json::Value = self.do_post("functions/code", &body)?;
        Ok(())
    }

    fn default_account(&self) -> Result<AccountInfo, RemoteError> {
        let body = self.do_get("account")?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Serialization(e.to_string()))
    }

    fn bootstrap_environment(
        &self,
        target: &DeploymentTarget,
        params: &BootstrapParams,
    ) -> Result<BootstrapOutcome, RemoteError> {
        let body = BootstrapBody {
            target: target.clone(),
            params: params.clone(),
        };
        self.do_post("bootstrap", &body)
    }
}

/// Opens [`HttpControlPlane`] sessions, picking the endpoint from an explicit
/// URL or from the profile file.
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    url_override: Option<String>,
    token_override: Option<String>,
    profiles_path: Option<PathBuf>,
}

impl HttpConnector {
    pub fn new(url_override: Option<&str>) -> Self {
        Self {
            url_override: url_override.map(str::to_owned),
            token_override: None,
            profiles_path: None,
        }
    }

    /// Token sent with every session opened against the explicit URL.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.token_override = token;
        self
    }

    #[must_use]
    pub fn with_profiles_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.profiles_path = Some(path.into());
        self
    }

    fn config_for(&self, profile: Option<&str>) -> Result<RemoteConfig, RemoteError> {
        if let Some(ref url) = self.url_override {
            let config = RemoteConfig::new(url);
            return Ok(match self.token_override {
                Some(ref token) => config.with_token(token),
                None => config,
            });
        }
        let profiles = match self.profiles_path {
            Some(ref path) => RemoteProfiles::load(path),
            None => RemoteProfiles::load_default(),
        }
        .map_err(|e| RemoteError::Credentials(format!("no --remote and no profile config: {e}")))?;
        profiles.profile(profile)
    }
}

impl Connector for HttpConnector {
    fn connect(&self, request: &SessionRequest) -> Result<Arc<dyn ControlPlane>, RemoteError> {
        let config = self.config_for(request.profile.as_deref())?;
        tracing::debug!(
            "connecting to control plane at {} (profile {})",
            config.url,
            request.profile.as_deref().unwrap_or("default")
        );
        Ok(Arc::new(
            HttpControlPlane::new(config).with_assumed_role(request.assume_role.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::Mutex;

    /// A captured HTTP request for header inspection.
    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
    }

    /// Answers every request with `status` and `body`, recording what it saw.
    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start(status: u16, body: &'static str) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let mut reader = BufReader::new(stream.try_clone().unwrap());
                    let mut request_line = String::new();
                    if reader.read_line(&mut request_line).is_err() {
                        continue;
                    }
                    let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                    if parts.len() < 2 {
                        continue;
                    }

                    let mut content_length: usize = 0;
                    let mut headers = HashMap::new();
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                            break;
                        }
                        if let Some((k, v)) = line.trim().split_once(": ") {
                            let k = k.to_lowercase();
                            if k == "content-length" {
                                content_length = v.parse().unwrap_or(0);
                            }
                            headers.insert(k, v.to_owned());
                        }
                    }
                    let mut payload = vec![0u8; content_length];
                    let _ = std::io::Read::read_exact(&mut reader, &mut payload);

                    requests_clone.lock().unwrap().push(CapturedRequest {
                        method: parts[0].to_owned(),
                        path: parts[1].to_owned(),
                        headers,
                    });

                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
            });

            Self {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[test]
    fn sends_protocol_auth_and_role_headers() {
        let server = MockServer::start(200, r#"{"account_id":"111122223333","partition":"aws"}"#);
        let client = HttpControlPlane::new(RemoteConfig::new(&server.addr).with_token("tok"))
            .with_assumed_role(Some("arn:aws:iam::111122223333:role/deployer".to_owned()));

        let account = client.default_account().unwrap();
        assert_eq!(account.account_id, "111122223333");

        let reqs = server.requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "GET");
        assert_eq!(reqs[0].path, "/account");
        assert_eq!(reqs[0].headers["x-stratus-protocol"], "1");
        assert_eq!(reqs[0].headers["authorization"], "Bearer tok");
        assert_eq!(
            reqs[0].headers["x-stratus-assume-role"],
            "arn:aws:iam::111122223333:role/deployer"
        );
    }

    #[test]
    fn missing_stack_maps_to_not_exists() {
        let server = MockServer::start(404, "not found");
        let client = HttpControlPlane::new(RemoteConfig::new(&server.addr));
        let state = client.describe_stack("svc-dev").unwrap();
        assert!(!state.exists);
        assert_eq!(server.requests()[0].path, "/stacks/svc-dev");
    }

    #[test]
    fn forbidden_maps_to_credentials_error() {
        let server = MockServer::start(403, "denied");
        let client = HttpControlPlane::new(RemoteConfig::new(&server.addr));
        assert!(matches!(
            client.default_account().unwrap_err(),
            RemoteError::Credentials(_)
        ));
    }

    #[test]
    fn put_object_uses_bucket_and_key_path() {
        let server = MockServer::start(200, "ok");
        let client = HttpControlPlane::new(RemoteConfig::new(&server.addr));
        client
            .put_object("staging", "function-deploys/hello/hello.zip", b"zip")
            .unwrap();
        let reqs = server.requests();
        assert_eq!(reqs[0].method, "PUT");
        assert_eq!(reqs[0].path, "/objects/staging/function-deploys/hello/hello.zip");
        assert!(!reqs[0].headers.contains_key("x-stratus-assume-role"));
    }

    #[test]
    fn path_segments_are_percent_encoded() {
        let server = MockServer::start(404, "not found");
        let client = HttpControlPlane::new(RemoteConfig::new(&server.addr));
        client.describe_stack("orders stack").unwrap();
        let key = "function-deploys/hello world/hello world.zip";
        assert!(client.put_object("staging", key, b"zip").is_err());
        let reqs = server.requests();
        assert_eq!(reqs[0].path, "/stacks/orders%20stack");
        assert_eq!(
            reqs[1].path,
            "/objects/staging/function-deploys/hello%20world/hello%20world.zip"
        );
    }

    #[test]
    fn connector_prefers_explicit_url() {
        let connector = HttpConnector::new(Some("http://127.0.0.1:1/"))
            .with_profiles_path("/nonexistent/remote.json");
        let config = connector.config_for(Some("prod")).unwrap();
        assert_eq!(config.url, "http://127.0.0.1:1");
    }

    #[test]
    fn connector_reads_profile_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        RemoteProfiles::default()
            .with_profile("prod", RemoteConfig::new("https://prod.example.com"))
            .save(&path)
            .unwrap();
        let connector = HttpConnector::new(None).with_profiles_path(&path);
        assert_eq!(
            connector.config_for(Some("prod")).unwrap().url,
            "https://prod.example.com"
        );
        assert!(matches!(
            connector.config_for(None).unwrap_err(),
            RemoteError::Credentials(_)
        ));
    }
}
