use crate::artifact::{ArtifactLocator, ArtifactSource};
use crate::build::{BuildStep, CommandBuildStep};
use crate::config::{ConfigResolver, InvocationOptions, SessionConfig};
use crate::environment::EnvironmentContext;
use crate::extension::ExtensionRegistry;
use crate::lifecycle::{Lifecycle, Phase};
use crate::synth::synthesize;
use crate::CoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::cell::{Cell, OnceCell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratus_remote::{
    AccountInfo, BootstrapOutcome, BootstrapParams, Connector, ControlPlane, DestroyOptions,
    SessionRequest, StackDiff, STAGING_BUCKET_OUTPUT,
};
use stratus_schema::{canonicalize, output_key, parse_service_file, Assembly, ServiceDescription};
use tracing::{debug, info};

/// Result of a single-function code update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionUpdate {
    pub function: String,
    /// Live identifier (ARN) of the updated function.
    pub identifier: String,
    pub bucket: String,
    pub key: String,
}

/// Drives one service through the deployment lifecycle.
///
/// An orchestrator lives for one invocation. The control-plane session, the
/// default-account lookup, and the environment context are computed on first
/// use and cached; the build step runs at most once.
pub struct Orchestrator {
    root: PathBuf,
    service: ServiceDescription,
    options: InvocationOptions,
    session: SessionConfig,
    connector: Arc<dyn Connector>,
    extensions: ExtensionRegistry,
    build_step: Box<dyn BuildStep>,
    control_plane: OnceCell<Arc<dyn ControlPlane>>,
    account: OnceCell<AccountInfo>,
    environment: OnceCell<EnvironmentContext>,
    built: Cell<bool>,
    lifecycle: Cell<Lifecycle>,
}

impl Orchestrator {
    pub fn new(
        root: impl Into<PathBuf>,
        service: &ServiceDescription,
        options: InvocationOptions,
        session: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let root = root.into();
        let service = service.with_assembly_excluded();
        let build_step = Box::new(CommandBuildStep::new(&root, &service.provider.build));
        Self {
            root,
            service,
            options,
            session,
            connector,
            extensions: ExtensionRegistry::with_builtins(),
            build_step,
            control_plane: OnceCell::new(),
            account: OnceCell::new(),
            environment: OnceCell::new(),
            built: Cell::new(false),
            lifecycle: Cell::new(Lifecycle::default()),
        }
    }

    /// Load the service description at `config_path`; its directory becomes
    /// the service root.
    pub fn load(
        config_path: &Path,
        options: InvocationOptions,
        session: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, CoreError> {
        let service = parse_service_file(config_path)?;
        let root = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        debug!("loaded service {} from {}", service.service, config_path.display());
        Ok(Self::new(root, &service, options, session, connector))
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: ExtensionRegistry) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub fn with_build_step(mut self, build_step: Box<dyn BuildStep>) -> Self {
        self.build_step = build_step;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The service description, with the assembly directory excluded from
    /// packaging.
    pub fn service(&self) -> &ServiceDescription {
        &self.service
    }

    pub fn phase(&self) -> Phase {
        self.lifecycle.get().phase
    }

    pub fn resolver(&self) -> ConfigResolver<'_> {
        ConfigResolver::new(&self.root, &self.service, &self.options, &self.session)
    }

    fn control_plane(&self) -> Result<&Arc<dyn ControlPlane>, CoreError> {
        if let Some(plane) = self.control_plane.get() {
            return Ok(plane);
        }
        let resolver = self.resolver();
        let request = SessionRequest {
            profile: resolver.profile(),
            assume_role: resolver.cfn_role(),
        };
        debug!(
            "connecting to control plane (profile: {}, role: {})",
            request.profile.as_deref().unwrap_or("default"),
            request.assume_role.as_deref().unwrap_or("none")
        );
        let plane = self.connector.connect(&request)?;
        Ok(self.control_plane.get_or_init(|| plane))
    }

    /// Default account of the session's credentials.
    pub fn account(&self) -> Result<&AccountInfo, CoreError> {
        if let Some(account) = self.account.get() {
            return Ok(account);
        }
        let account = self.control_plane()?.default_account()?;
        debug!("default account is {}", account.account_id);
        Ok(self.account.get_or_init(|| account))
    }

    pub fn environment(&self) -> Result<&EnvironmentContext, CoreError> {
        if let Some(env) = self.environment.get() {
            return Ok(env);
        }
        let env = EnvironmentContext::resolve(&self.resolver(), || self.account().cloned())?;
        Ok(self.environment.get_or_init(|| env))
    }

    fn check(&self, to: Phase) -> Result<(), CoreError> {
        self.lifecycle.get().advance(to).map(|_| ())
    }

    fn advance(&self, to: Phase) -> Result<(), CoreError> {
        let next = self.lifecycle.get().advance(to)?;
        self.lifecycle.set(next);
        Ok(())
    }

    /// Ensure the toolkit stack (staging bucket, execution policies) exists.
    pub fn bootstrap(&self) -> Result<BootstrapOutcome, CoreError> {
        self.check(Phase::Bootstrapped)?;
        let resolver = self.resolver();
        let env = self.environment()?;
        let params = BootstrapParams {
            toolkit_stack_name: resolver.toolkit_stack_name(),
            bucket_name: resolver.deployment_bucket(),
            execution_policies: resolver.execution_policies(),
            role_arn: resolver.cfn_role(),
        };
        info!(
            "bootstrapping {} in {}",
            params.toolkit_stack_name, env.target
        );
        let outcome = self
            .control_plane()?
            .bootstrap_environment(&env.target, &params)?;
        info!("bootstrap {outcome:?}");
        self.advance(Phase::Bootstrapped)?;
        Ok(outcome)
    }

    /// Run the build step unless it already ran in this invocation.
    pub fn compile(&self) -> Result<(), CoreError> {
        if self.built.get() {
            debug!("build already ran in this invocation");
            return Ok(());
        }
        self.build_step.build(&self.resolver().build_config_path())?;
        self.built.set(true);
        Ok(())
    }

    pub fn clean(&self) -> Result<(), CoreError> {
        self.build_step.clean(&self.resolver().build_config_path())?;
        self.built.set(false);
        Ok(())
    }

    /// Synthesize the service's stack and write it to the assembly directory.
    pub fn synthesize(&self) -> Result<Assembly, CoreError> {
        self.synthesize_service(&self.service)
    }

    fn synthesize_service(&self, service: &ServiceDescription) -> Result<Assembly, CoreError> {
        self.check(Phase::Synthesized)?;
        let env = self.environment()?;
        self.compile()?;

        let resolver = ConfigResolver::new(&self.root, service, &self.options, &self.session);
        let locator = ArtifactLocator::new(&self.root, service, resolver.package_root());
        let extension = self
            .extensions
            .select(service.provider.extension.as_deref())?;
        let assembly = synthesize(service, env, &locator, extension)?;
        assembly.write()?;
        info!(
            "synthesized {} into {}",
            env.stack_name,
            assembly.outdir.display()
        );
        self.advance(Phase::Synthesized)?;
        Ok(assembly)
    }

    /// Compare the synthesized stack against what is deployed. Read-only.
    pub fn diff(&self) -> Result<Vec<StackDiff>, CoreError> {
        let assembly = self.synthesize()?;
        let stack_name = self.environment()?.stack_name.clone();
        let diffs = self.control_plane()?.diff(&assembly, &[stack_name])?;
        self.advance(Phase::Diffed)?;
        Ok(diffs)
    }

    /// Bootstrap (once per invocation), synthesize, and deploy the stack.
    pub fn deploy(&self) -> Result<Assembly, CoreError> {
        if !self.lifecycle.get().bootstrapped {
            self.bootstrap()?;
        }
        let assembly = self.synthesize()?;
        self.check(Phase::Deployed)?;
        let env = self.environment()?;
        let role = self.resolver().cfn_role();
        info!("deploying {} to {}", env.stack_name, env.target);
        self.control_plane()?
            .deploy(&assembly, &[env.stack_name.clone()], role.as_deref())?;
        self.advance(Phase::Deployed)?;
        Ok(assembly)
    }

    /// Delete the stack. Functions without an explicit artifact are
    /// synthesized against a placeholder, so no build output is required.
    pub fn destroy(&self) -> Result<(), CoreError> {
        let prepared = self.service.with_teardown_artifacts();
        let assembly = self.synthesize_service(&prepared)?;
        let env = self.environment()?;
        let options = DestroyOptions {
            exclusively: false,
            force: false,
            role_arn: self.resolver().cfn_role(),
        };
        info!("destroying {} in {}", env.stack_name, env.target);
        self.control_plane()?
            .destroy(&assembly, &[env.stack_name.clone()], &options)?;
        self.advance(Phase::Destroyed)
    }

    /// Replace the code of one already-deployed function without a full
    /// deploy.
    pub fn update_function(&self, name: &str) -> Result<FunctionUpdate, CoreError> {
        self.update_function_at(name, Utc::now())
    }

    /// [`Self::update_function`], with the upload key timestamped `now`.
    pub fn update_function_at(
        &self,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<FunctionUpdate, CoreError> {
        self.check(Phase::FunctionUpdated)?;
        if self.options.update_config {
            return Err(CoreError::Configuration(
                "update-config option is specified but isn't currently supported".to_owned(),
            ));
        }
        let function = self.service.function(name).ok_or_else(|| {
            CoreError::Configuration(format!("{name} is not a valid function name"))
        })?;

        let resolver = self.resolver();
        let stack_name = resolver.stack_name();
        let canonical = canonicalize(name);
        let output = output_key(&canonical);
        let plane = self.control_plane()?;

        let stack = plane.describe_stack(&stack_name)?;
        if !stack.exists {
            return Err(CoreError::Precondition(format!(
                "Failed to retrieve details of stack {stack_name}; does it exist?"
            )));
        }
        let identifier = stack.output(&output).map(str::to_owned).ok_or_else(|| {
            CoreError::Precondition(format!(
                "Failed to update function {name}; it needs to have previously been fully deployed"
            ))
        })?;

        let locator = ArtifactLocator::new(&self.root, &self.service, resolver.package_root());
        let ArtifactSource::Path(path) = locator.locate(name, function) else {
            return Err(CoreError::Precondition(format!(
                "function {name} has no artifact to upload"
            )));
        };
        let data = std::fs::read(&path).map_err(|e| {
            CoreError::Precondition(format!(
                "cannot read artifact {} for function {name}: {e}",
                path.display()
            ))
        })?;

        let toolkit = resolver.toolkit_stack_name();
        let bucket = plane
            .describe_stack(&toolkit)?
            .output(STAGING_BUCKET_OUTPUT)
            .map(str::to_owned)
            .ok_or_else(|| {
                CoreError::Precondition(format!(
                    "toolkit stack {toolkit} has no {STAGING_BUCKET_OUTPUT} output; run bootstrap first"
                ))
            })?;

        let key = format!(
            "function-deploys/{canonical}/{canonical}-{}.zip",
            now.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        info!("uploading updated {name} code to s3://{bucket}/{key}");
        plane.put_object(&bucket, &key, &data)?;
        info!("updating {name} definition");
        plane.update_function_code(&identifier, &bucket, &key)?;

        self.advance(Phase::FunctionUpdated)?;
        Ok(FunctionUpdate {
            function: name.to_owned(),
            identifier,
            bucket,
            key,
        })
    }
}
