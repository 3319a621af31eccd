//! Remote collaborators for Stratus deployments.
//!
//! This crate defines the two seams the orchestrator drives: the [`Toolkit`]
//! (executes desired-state descriptions: deploy, diff, destroy) and the
//! [`CloudClient`] (queries and mutates live control-plane state). It ships an
//! HTTP implementation speaking the Stratus control-plane protocol, an
//! in-memory implementation used by tests and the reference server, and the
//! profile configuration that selects a remote endpoint.

pub mod config;
pub mod diff;
pub mod http;
pub mod memory;
pub mod protocol;

pub use config::{RemoteConfig, RemoteProfiles};
pub use diff::{diff_templates, StackDiff};
pub use http::{HttpConnector, HttpControlPlane};
pub use memory::{InMemoryControlPlane, SharedConnector};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratus_schema::{Assembly, DeploymentTarget};
use thiserror::Error;

/// Protocol version sent as `X-Stratus-Protocol` header on all HTTP requests.
pub const PROTOCOL_VERSION: u32 = 1;

/// Name of the toolkit stack output holding the staging bucket.
pub const STAGING_BUCKET_OUTPUT: &str = "BucketName";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("remote config error: {0}")]
    Config(String),
    #[error("credentials error: {0}")]
    Credentials(String),
    #[error("stack '{0}' is not part of the assembly")]
    UnknownStack(String),
    #[error("asset for '{resource}' is unavailable: {reason}")]
    Asset { resource: String, reason: String },
    #[error("deployment of stack '{stack}' failed: {reason}")]
    Rejected { stack: String, reason: String },
}

/// Live state of a stack as reported by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStackState {
    pub exists: bool,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl RemoteStackState {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub partition: String,
}

/// Parameters of the toolkit (staging) stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapParams {
    pub toolkit_stack_name: String,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub execution_policies: Vec<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    Created,
    Updated,
    AlreadyCurrent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyOptions {
    /// Only remove the named stacks, never their dependencies.
    pub exclusively: bool,
    /// Remove even when other stacks still depend on these.
    pub force: bool,
    #[serde(default)]
    pub role_arn: Option<String>,
}

/// Execution engine: turns desired-state descriptions into remote changes.
pub trait Toolkit: Send + Sync {
    /// Converge the named stacks to the assembly's desired state.
    fn deploy(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
        role_arn: Option<&str>,
    ) -> Result<(), RemoteError>;

    /// Compare the named stacks against their last deployed state.
    fn diff(&self, assembly: &Assembly, stack_names: &[String])
        -> Result<Vec<StackDiff>, RemoteError>;

    /// Delete the named stacks.
    fn destroy(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
        options: &DestroyOptions,
    ) -> Result<(), RemoteError>;
}

/// Control-plane client for live resource state.
pub trait CloudClient: Send + Sync {
    fn describe_stack(&self, name: &str) -> Result<RemoteStackState, RemoteError>;

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), RemoteError>;

    /// Point a deployed function at new code stored in `bucket/key`.
    fn update_function_code(
        &self,
        identifier: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), RemoteError>;

    /// Account and partition of the active credentials.
    fn default_account(&self) -> Result<AccountInfo, RemoteError>;

    /// Ensure the toolkit stack exists and matches `params`.
    fn bootstrap_environment(
        &self,
        target: &DeploymentTarget,
        params: &BootstrapParams,
    ) -> Result<BootstrapOutcome, RemoteError>;
}

/// A connected session offering both the execution engine and the
/// control-plane client.
pub trait ControlPlane: Toolkit + CloudClient {}

impl<T: Toolkit + CloudClient> ControlPlane for T {}

/// What a session is opened for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    pub profile: Option<String>,
    pub assume_role: Option<String>,
}

/// Opens control-plane sessions.
pub trait Connector: Send + Sync {
    fn connect(&self, request: &SessionRequest) -> Result<Arc<dyn ControlPlane>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_stack_has_no_outputs() {
        let state = RemoteStackState::missing();
        assert!(!state.exists);
        assert!(state.output("helloArn").is_none());
    }

    #[test]
    fn bootstrap_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&BootstrapOutcome::AlreadyCurrent).unwrap();
        assert_eq!(json, "\"already_current\"");
    }

    #[test]
    fn destroy_options_default_is_non_exclusive() {
        let opts = DestroyOptions::default();
        assert!(!opts.exclusively);
        assert!(!opts.force);
        assert!(opts.role_arn.is_none());
    }
}
