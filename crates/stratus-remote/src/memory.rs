use crate::diff::{diff_templates, StackDiff};
use crate::protocol::{select_stacks, stage_assets};
use crate::{
    AccountInfo, BootstrapOutcome, BootstrapParams, CloudClient, Connector, ControlPlane,
    DestroyOptions, RemoteError, RemoteStackState, SessionRequest, Toolkit,
    STAGING_BUCKET_OUTPUT,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use stratus_schema::{
    Assembly, AttributeRef, CodeSource, DeploymentTarget, DesiredState, LogicalId, Resource,
};

/// Where a deployed function's code currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployedCode {
    Asset(String),
    Object { bucket: String, key: String },
}

#[derive(Debug, Clone)]
struct DeployedStack {
    template: Option<DesiredState>,
    outputs: BTreeMap<String, String>,
    bootstrap: Option<BootstrapParams>,
}

#[derive(Debug, Default)]
struct State {
    account: Option<AccountInfo>,
    stacks: BTreeMap<String, DeployedStack>,
    objects: BTreeMap<(String, String), Vec<u8>>,
    assets: BTreeMap<String, Vec<u8>>,
    functions: BTreeMap<String, DeployedCode>,
    roles: Vec<Option<String>>,
    calls: Vec<String>,
}

/// A control plane that keeps every stack, object and function in memory.
///
/// Deploys resolve output references into fake but well-formed ARNs, so the
/// full lifecycle (deploy, describe, update a function, destroy) can be
/// exercised without a network.
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                account: Some(AccountInfo {
                    account_id: "123456789012".to_owned(),
                    partition: "aws".to_owned(),
                }),
                ..State::default()
            }),
        }
    }
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// A control plane whose credentials resolve to no account.
    pub fn without_credentials() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    #[must_use]
    pub fn with_account(self, account_id: &str, partition: &str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.account = Some(AccountInfo {
                account_id: account_id.to_owned(),
                partition: partition.to_owned(),
            });
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))
    }

    fn record(state: &mut State, call: String) {
        tracing::trace!("in-memory control plane: {call}");
        state.calls.push(call);
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    /// Roles passed to deploy and destroy, oldest first.
    pub fn roles(&self) -> Vec<Option<String>> {
        self.lock().map(|s| s.roles.clone()).unwrap_or_default()
    }

    pub fn deployed_template(&self, stack_name: &str) -> Option<DesiredState> {
        self.lock()
            .ok()?
            .stacks
            .get(stack_name)
            .and_then(|s| s.template.clone())
    }

    pub fn function_code(&self, identifier: &str) -> Option<DeployedCode> {
        self.lock().ok()?.functions.get(identifier).cloned()
    }

    pub fn function_count(&self) -> usize {
        self.lock().map(|s| s.functions.len()).unwrap_or_default()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .ok()?
            .objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    pub fn store_asset(&self, digest: &str, data: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, format!("put_asset:{digest}"));
        state.assets.insert(digest.to_owned(), data.to_vec());
        Ok(())
    }

    /// Converge one stack to `template`, whose assets must already be stored.
    pub fn apply_template(
        &self,
        template: &DesiredState,
        role_arn: Option<&str>,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        let stack = template.stack_name.clone();
        Self::record(&mut state, format!("deploy:{stack}"));
        state.roles.push(role_arn.map(str::to_owned));

        let mut functions = BTreeMap::new();
        for (id, resource) in &template.resources {
            let Resource::Function(unit) = resource else {
                continue;
            };
            let code = match &unit.code {
                CodeSource::Asset { digest, path } => {
                    let digest = digest
                        .as_deref()
                        .filter(|d| state.assets.contains_key(*d))
                        .ok_or_else(|| RemoteError::Rejected {
                            stack: stack.clone(),
                            reason: format!("asset {path} for {id} was not uploaded"),
                        })?;
                    DeployedCode::Asset(digest.to_owned())
                }
                CodeSource::Bucket { bucket, key } => {
                    if !state.objects.contains_key(&(bucket.clone(), key.clone())) {
                        return Err(RemoteError::Rejected {
                            stack,
                            reason: format!("s3://{bucket}/{key} for {id} does not exist"),
                        });
                    }
                    DeployedCode::Object {
                        bucket: bucket.clone(),
                        key: key.clone(),
                    }
                }
            };
            functions.insert(
                function_arn(&template.target, &stack, id, unit.function_name.as_deref()),
                code,
            );
        }

        let mut outputs = BTreeMap::new();
        for (key, output) in &template.outputs {
            outputs.insert(
                key.to_string(),
                resolve_attribute(template, &output.value).ok_or_else(|| {
                    RemoteError::Rejected {
                        stack: stack.clone(),
                        reason: format!(
                            "output {key} references unknown resource {}",
                            output.value.resource
                        ),
                    }
                })?,
            );
        }

        let previous: BTreeSet<String> = state
            .stacks
            .get(&stack)
            .map(|s| s.outputs.values().cloned().collect())
            .unwrap_or_default();
        for arn in previous {
            if !functions.contains_key(&arn) {
                state.functions.remove(&arn);
            }
        }
        // Redeploying unchanged resources keeps any out-of-band code update.
        let unchanged = state
            .stacks
            .get(&stack)
            .and_then(|s| s.template.as_ref())
            .is_some_and(|old| old.resources == template.resources);
        for (arn, code) in functions {
            if !(unchanged && state.functions.contains_key(&arn)) {
                state.functions.insert(arn, code);
            }
        }
        state.stacks.insert(
            stack,
            DeployedStack {
                template: Some(template.clone()),
                outputs,
                bootstrap: None,
            },
        );
        Ok(())
    }

    pub fn diff_template(&self, template: &DesiredState) -> Result<StackDiff, RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, format!("diff:{}", template.stack_name));
        let deployed = state
            .stacks
            .get(&template.stack_name)
            .and_then(|s| s.template.as_ref());
        Ok(diff_templates(deployed, template))
    }

    pub fn remove_stack(
        &self,
        stack_name: &str,
        options: &DestroyOptions,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, format!("destroy:{stack_name}"));
        state.roles.push(options.role_arn.clone());
        if let Some(removed) = state.stacks.remove(stack_name) {
            for arn in removed.outputs.values() {
                state.functions.remove(arn);
            }
        }
        Ok(())
    }
}

fn function_arn(
    target: &DeploymentTarget,
    stack: &str,
    id: &LogicalId,
    function_name: Option<&str>,
) -> String {
    let name = function_name.map_or_else(|| format!("{stack}-{id}"), str::to_owned);
    format!(
        "arn:{}:lambda:{}:{}:function:{name}",
        target.partition, target.region, target.account_id
    )
}

fn resolve_attribute(template: &DesiredState, attr: &AttributeRef) -> Option<String> {
    let resource = template.resources.get(&attr.resource)?;
    let stack = &template.stack_name;
    let target = &template.target;
    let value = match (resource, attr.attribute.as_str()) {
        (Resource::Function(unit), "arn") => {
            function_arn(target, stack, &attr.resource, unit.function_name.as_deref())
        }
        (Resource::Custom { kind, .. }, "arn") => format!(
            "arn:{}:{kind}:{}:{}:{stack}/{}",
            target.partition, target.region, target.account_id, attr.resource
        ),
        (_, other) => format!("{stack}/{}/{other}", attr.resource),
    };
    Some(value)
}

fn staging_bucket(target: &DeploymentTarget, params: &BootstrapParams) -> String {
    params.bucket_name.clone().unwrap_or_else(|| {
        format!(
            "{}-staging-{}-{}",
            params.toolkit_stack_name.to_lowercase(),
            target.account_id,
            target.region
        )
    })
}

impl Toolkit for InMemoryControlPlane {
    fn deploy(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
        role_arn: Option<&str>,
    ) -> Result<(), RemoteError> {
        for template in select_stacks(assembly, stack_names)? {
            let staged = stage_assets(template, |digest, data| self.store_asset(digest, data))?;
            self.apply_template(&staged, role_arn)?;
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
            .map(|template| self.diff_template(template))
            .collect()
    }

    fn destroy(
        &self,
        assembly: &Assembly,
        stack_names: &[String],
        options: &DestroyOptions,
    ) -> Result<(), RemoteError> {
        for template in select_stacks(assembly, stack_names)? {
            self.remove_stack(&template.stack_name, options)?;
        }
        Ok(())
    }
}

impl CloudClient for InMemoryControlPlane {
    fn describe_stack(&self, name: &str) -> Result<RemoteStackState, RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, format!("describe_stack:{name}"));
        Ok(state
            .stacks
            .get(name)
            .map_or_else(RemoteStackState::missing, |s| RemoteStackState {
                exists: true,
                outputs: s.outputs.clone(),
            }))
    }

    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, format!("put_object:{bucket}/{key}"));
        state
            .objects
            .insert((bucket.to_owned(), key.to_owned()), data.to_vec());
        Ok(())
    }

    fn update_function_code(
        &self,
        identifier: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, format!("update_function_code:{identifier}"));
        if !state.functions.contains_key(identifier) {
            return Err(RemoteError::NotFound(format!("function {identifier}")));
        }
        if !state
            .objects
            .contains_key(&(bucket.to_owned(), key.to_owned()))
        {
            return Err(RemoteError::NotFound(format!("object s3://{bucket}/{key}")));
        }
        state.functions.insert(
            identifier.to_owned(),
            DeployedCode::Object {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            },
        );
        Ok(())
    }

    fn default_account(&self) -> Result<AccountInfo, RemoteError> {
        let mut state = self.lock()?;
        Self::record(&mut state, "default_account".to_owned());
        state
            .account
            .clone()
            .ok_or_else(|| RemoteError::Credentials("no credentials configured".to_owned()))
    }

    fn bootstrap_environment(
        &self,
        target: &DeploymentTarget,
        params: &BootstrapParams,
    ) -> Result<BootstrapOutcome, RemoteError> {
        let mut state = self.lock()?;
        Self::record(
            &mut state,
            format!("bootstrap:{}", params.toolkit_stack_name),
        );
        let outcome = match state
            .stacks
            .get(&params.toolkit_stack_name)
            .and_then(|s| s.bootstrap.as_ref())
        {
            Some(existing) if existing == params => return Ok(BootstrapOutcome::AlreadyCurrent),
            Some(_) => BootstrapOutcome::Updated,
            None => BootstrapOutcome::Created,
        };
        let outputs = BTreeMap::from([(
            STAGING_BUCKET_OUTPUT.to_owned(),
            staging_bucket(target, params),
        )]);
        state.stacks.insert(
            params.toolkit_stack_name.clone(),
            DeployedStack {
                template: None,
                outputs,
                bootstrap: Some(params.clone()),
            },
        );
        Ok(outcome)
    }
}

/// Hands out the same in-memory control plane to every session.
#[derive(Clone, Default)]
pub struct SharedConnector {
    plane: Arc<InMemoryControlPlane>,
    sessions: Arc<Mutex<Vec<SessionRequest>>>,
}

impl SharedConnector {
    pub fn new(plane: Arc<InMemoryControlPlane>) -> Self {
        Self {
            plane,
            sessions: Arc::default(),
        }
    }

    pub fn plane(&self) -> &Arc<InMemoryControlPlane> {
        &self.plane
    }

    /// Session requests received so far.
    pub fn sessions(&self) -> Vec<SessionRequest> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Connector for SharedConnector {
    fn connect(&self, request: &SessionRequest) -> Result<Arc<dyn ControlPlane>, RemoteError> {
        self.sessions
            .lock()
            .map_err(|e| RemoteError::Http(format!("mutex poisoned: {e}")))?
            .push(request.clone());
        Ok(self.plane.clone())
    }
}
