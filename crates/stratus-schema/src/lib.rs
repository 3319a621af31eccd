//! Service description parsing, identifier derivation, and desired-state
//! templates for Stratus.
//!
//! This crate defines the schema layer: TOML service descriptions
//! (`ServiceDescription`), the deterministic name transformations that link a
//! logical function to its remote identifier (`canonicalize`, `output_key`),
//! and the desired-state description (`DesiredState`, `Assembly`) handed to the
//! execution engine.

pub mod identifiers;
pub mod service;
pub mod template;
pub mod types;

pub use identifiers::{
    alphanumeric, canonicalize, function_logical_id, output_construct_id, output_key,
};
pub use service::{
    parse_service_file, parse_service_str, BuildSection, DeclaredResource, DeploymentBucket,
    FunctionDef, FunctionPackage, ManifestError, PackageSection, ProviderSection,
    ServiceDescription, ASSEMBLY_DIR, TEARDOWN_ARTIFACT,
};
pub use template::{
    Assembly, AttributeRef, CodeSource, ComputeUnit, DeploymentTarget, DesiredState, Resource,
    StackOutput, TemplateError,
};
pub use types::{CanonicalName, LogicalId, OutputKey};
