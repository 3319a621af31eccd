//! Core orchestration engine for Stratus deployments.
//!
//! This crate resolves configuration from overlapping sources
//! (`ConfigResolver`), fixes the deployment target of one invocation
//! (`EnvironmentContext`), locates function artifacts (`ArtifactLocator`),
//! synthesizes desired-state assemblies, and drives them through the
//! bootstrap, diff, deploy, destroy, and single-function update lifecycle
//! (`Orchestrator`).

pub mod artifact;
pub mod build;
pub mod config;
pub mod environment;
pub mod extension;
pub mod lifecycle;
pub mod orchestrator;
pub mod synth;

pub use artifact::{ArtifactLocator, ArtifactSource};
pub use build::{BuildStep, CommandBuildStep, BUILD_CONFIG_ENV};
pub use config::{ConfigResolver, InvocationOptions, SessionConfig};
pub use environment::EnvironmentContext;
pub use extension::{
    ComputeUnitHandle, DeclaredResources, ExtensionRegistry, InfrastructureExtension,
};
pub use lifecycle::{validate_transition, Lifecycle, Phase};
pub use orchestrator::{FunctionUpdate, Orchestrator};
pub use synth::synthesize;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{0}")]
    Precondition(String),
    #[error("synthesis error: {0}")]
    Synthesis(String),
    #[error("remote error: {0}")]
    Remote(#[from] stratus_remote::RemoteError),
    #[error("service description error: {0}")]
    Manifest(#[from] stratus_schema::ManifestError),
    #[error("template error: {0}")]
    Template(#[from] stratus_schema::TemplateError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
