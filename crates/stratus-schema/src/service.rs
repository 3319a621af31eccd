use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Directory (relative to the service root) that synthesized templates are
/// written to. Always excluded from packaging.
pub const ASSEMBLY_DIR: &str = ".stratus-assembly";

/// Artifact value marking a function that has no build output because the
/// current invocation is a teardown.
pub const TEARDOWN_ARTIFACT: &str = "STRATUS-TEARDOWN-PLACEHOLDER";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read service description: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse service description: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("function '{0}' has an empty handler")]
    EmptyHandler(String),
    #[error("function name must not be empty")]
    EmptyFunctionName,
    #[error("invalid stack name '{0}': must not contain '/', '\\' or '..'")]
    InvalidStackName(String),
}

/// A parsed service description: the functions to deploy plus provider and
/// packaging settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescription {
    pub service: String,
    #[serde(default)]
    pub provider: ProviderSection,
    #[serde(default)]
    pub package: PackageSection,
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionDef>,
    /// Extra resources appended verbatim by the `declared-resources` extension.
    #[serde(default)]
    pub resources: BTreeMap<String, DeclaredResource>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProviderSection {
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub stack_name: Option<String>,
    #[serde(default)]
    pub stack_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub cfn_role: Option<String>,
    #[serde(default)]
    pub execution_policies: Vec<String>,
    #[serde(default)]
    pub deployment_bucket: Option<DeploymentBucket>,
    #[serde(default)]
    pub ts_config_path: Option<String>,
    #[serde(default)]
    pub toolkit_stack_name: Option<String>,
    /// Runtime used by functions that do not declare their own.
    #[serde(default)]
    pub runtime: Option<String>,
    /// Name of a registered infrastructure extension.
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub build: BuildSection,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeploymentBucket {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub clean_command: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    #[serde(default)]
    pub individually: bool,
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FunctionDef {
    pub handler: String,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Explicit remote function name; generated by the control plane when unset.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub package: FunctionPackage,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FunctionPackage {
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub individually: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeclaredResource {
    pub kind: String,
    #[serde(default = "empty_properties")]
    pub properties: serde_json::Value,
}

fn empty_properties() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ServiceDescription {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.service.trim().is_empty() {
            return Err(ManifestError::EmptyServiceName);
        }
        // Stack names become template file names and URL path segments.
        let stack_names = [
            Some(&self.service),
            self.provider.stack_name.as_ref(),
            self.provider.toolkit_stack_name.as_ref(),
        ];
        for name in stack_names.into_iter().flatten() {
            if name.contains(['/', '\\']) || name.contains("..") {
                return Err(ManifestError::InvalidStackName(name.clone()));
            }
        }
        for (name, func) in &self.functions {
            if name.is_empty() {
                return Err(ManifestError::EmptyFunctionName);
            }
            if func.handler.trim().is_empty() {
                return Err(ManifestError::EmptyHandler(name.clone()));
            }
        }
        Ok(())
    }

    /// Return a copy whose package excludes contain the assembly directory.
    #[must_use]
    pub fn with_assembly_excluded(&self) -> Self {
        let pattern = format!("{ASSEMBLY_DIR}/**");
        let mut merged = self.clone();
        if !merged.package.exclude.contains(&pattern) {
            merged.package.exclude.push(pattern);
        }
        merged
    }

    /// Return a copy in which every function without an explicit artifact
    /// points at [`TEARDOWN_ARTIFACT`].
    #[must_use]
    pub fn with_teardown_artifacts(&self) -> Self {
        let mut prepared = self.clone();
        for func in prepared.functions.values_mut() {
            if func.package.artifact.is_none() {
                func.package.artifact = Some(TEARDOWN_ARTIFACT.to_owned());
            }
        }
        prepared
    }
}

pub fn parse_service_str(input: &str) -> Result<ServiceDescription, ManifestError> {
    let service: ServiceDescription = toml::from_str(input)?;
    service.validate()?;
    Ok(service)
}

pub fn parse_service_file(path: impl AsRef<Path>) -> Result<ServiceDescription, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_service_str(&content)
}
