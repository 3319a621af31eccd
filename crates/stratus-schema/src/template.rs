//! Desired-state descriptions handed to the execution engine.
//!
//! Every map is a `BTreeMap`, so the canonical JSON rendering of a template is
//! a pure function of its content and [`DesiredState::fingerprint`] is stable
//! across runs.

use crate::types::{LogicalId, OutputKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bucket that teardown placeholders point at. Never created.
pub const PLACEHOLDER_BUCKET: &str = "stratus-teardown-placeholder-bucket";
/// Object key that teardown placeholders point at. Never uploaded.
pub const PLACEHOLDER_KEY: &str = "no-such-key";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("template serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// The remote environment a stack is deployed into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub stage: String,
    pub region: String,
    pub account_id: String,
    pub partition: String,
}

impl fmt::Display for DeploymentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}/{} ({})",
            self.partition, self.account_id, self.region, self.stage
        )
    }
}

/// Where a function's code comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CodeSource {
    /// A local artifact the execution engine uploads during deploy.
    Asset {
        path: String,
        /// blake3 digest of the artifact bytes, when the file was readable at
        /// synthesis time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
    },
    /// An object that already lives in remote storage.
    Bucket { bucket: String, key: String },
}

impl CodeSource {
    pub fn placeholder() -> Self {
        Self::Bucket {
            bucket: PLACEHOLDER_BUCKET.to_owned(),
            key: PLACEHOLDER_KEY.to_owned(),
        }
    }
}

/// A compute unit (function) definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    pub handler: String,
    pub runtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    pub code: CodeSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Function(ComputeUnit),
    /// Any resource contributed by an infrastructure extension.
    Custom {
        kind: String,
        #[serde(default)]
        properties: serde_json::Value,
    },
}

impl Resource {
    pub fn kind(&self) -> &str {
        match self {
            Self::Function(_) => "function",
            Self::Custom { kind, .. } => kind,
        }
    }
}

/// Reference to an attribute of a resource that is only known after deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRef {
    pub resource: LogicalId,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    /// Id of the construct that declared the output.
    pub construct_id: String,
    pub value: AttributeRef,
}

/// Desired state of one stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub stack_name: String,
    pub target: DeploymentTarget,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: BTreeMap<LogicalId, Resource>,
    #[serde(default)]
    pub outputs: BTreeMap<OutputKey, StackOutput>,
}

impl DesiredState {
    pub fn new(
        stack_name: impl Into<String>,
        target: DeploymentTarget,
        tags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            stack_name: stack_name.into(),
            target,
            tags,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// blake3 hex digest of the canonical JSON.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let json = self.canonical_json()?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// Local artifact paths referenced by function resources, with the owning
    /// resource id.
    pub fn assets(&self) -> impl Iterator<Item = (&LogicalId, &str, Option<&str>)> {
        self.resources.iter().filter_map(|(id, res)| match res {
            Resource::Function(ComputeUnit {
                code: CodeSource::Asset { path, digest },
                ..
            }) => Some((id, path.as_str(), digest.as_deref())),
            _ => None,
        })
    }
}

/// The synthesized stacks of one invocation, plus where they were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    pub outdir: PathBuf,
    pub stacks: BTreeMap<String, DesiredState>,
}

impl Assembly {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            outdir: outdir.into(),
            stacks: BTreeMap::new(),
        }
    }

    pub fn add_stack(&mut self, stack: DesiredState) {
        self.stacks.insert(stack.stack_name.clone(), stack);
    }

    pub fn stack(&self, name: &str) -> Option<&DesiredState> {
        self.stacks.get(name)
    }

    pub fn template_path(&self, stack_name: &str) -> PathBuf {
        self.outdir.join(format!("{stack_name}.template.json"))
    }

    /// Write every stack template into `outdir`, replacing previous files
    /// atomically.
    pub fn write(&self) -> Result<(), TemplateError> {
        fs::create_dir_all(&self.outdir)?;
        for (name, stack) in &self.stacks {
            let content = serde_json::to_string_pretty(stack)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&self.outdir)?;
            std::io::Write::write_all(&mut tmp, content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(self.template_path(name))
                .map_err(|e| TemplateError::Io(e.error))?;
        }
        Ok(())
    }

    pub fn read_template(path: impl AsRef<Path>) -> Result<DesiredState, TemplateError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
