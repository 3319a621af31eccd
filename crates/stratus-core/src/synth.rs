use crate::artifact::{ArtifactLocator, ArtifactSource};
use crate::environment::EnvironmentContext;
use crate::extension::{ComputeUnitHandle, InfrastructureExtension};
use crate::CoreError;
use std::collections::BTreeMap;
use std::path::Path;
use stratus_remote::protocol::asset_digest;
use stratus_schema::{
    canonicalize, function_logical_id, output_construct_id, output_key, Assembly, AttributeRef,
    CodeSource, ComputeUnit, DesiredState, Resource, ServiceDescription, StackOutput,
};
use tracing::{debug, info};

/// Build the desired state of the service's stack.
///
/// Every function becomes a `function` resource plus an output exposing its
/// live ARN under its output key. The selected extension, if any, may then
/// add resources. Nothing is written to disk; on error no partial assembly is
/// returned.
pub fn synthesize(
    service: &ServiceDescription,
    env: &EnvironmentContext,
    locator: &ArtifactLocator<'_>,
    extension: Option<&dyn InfrastructureExtension>,
) -> Result<Assembly, CoreError> {
    let mut stack = DesiredState::new(
        env.stack_name.clone(),
        env.target.clone(),
        env.stack_tags.clone(),
    );
    let mut handles = BTreeMap::new();
    let mut key_owners: BTreeMap<String, &str> = BTreeMap::new();

    for (name, function) in &service.functions {
        let runtime = function
            .runtime
            .as_deref()
            .filter(|r| !r.is_empty())
            .or_else(|| service.provider.runtime.as_deref().filter(|r| !r.is_empty()))
            .ok_or_else(|| {
                CoreError::Synthesis(format!(
                    "function '{name}' has no runtime; set functions.{name}.runtime or provider.runtime"
                ))
            })?;

        let code = match locator.locate(name, function) {
            ArtifactSource::Path(path) => CodeSource::Asset {
                digest: file_digest(&path),
                path: path.to_string_lossy().into_owned(),
            },
            ArtifactSource::Teardown => CodeSource::placeholder(),
        };

        let canonical = canonicalize(name);
        let logical_id = function_logical_id(&canonical);
        let key = output_key(&canonical);

        if let Some(owner) = key_owners.insert(key.to_string(), name) {
            return Err(CoreError::Synthesis(format!(
                "functions '{owner}' and '{name}' both map to output key {key}"
            )));
        }
        if stack.resources.contains_key(&logical_id) {
            return Err(CoreError::Synthesis(format!(
                "function '{name}' maps to logical id {logical_id}, which is already declared"
            )));
        }

        let unit = ComputeUnit {
            handler: function.handler.clone(),
            runtime: runtime.to_owned(),
            timeout: function.timeout,
            environment: function.environment.clone(),
            function_name: function.name.clone(),
            code,
        };
        debug!("declaring function {name} as {logical_id}");
        stack
            .resources
            .insert(logical_id.clone(), Resource::Function(unit.clone()));
        stack.outputs.insert(
            key.clone(),
            StackOutput {
                construct_id: output_construct_id(&canonical),
                value: AttributeRef {
                    resource: logical_id.clone(),
                    attribute: "arn".to_owned(),
                },
            },
        );
        handles.insert(
            name.clone(),
            ComputeUnitHandle {
                function: name.clone(),
                canonical,
                logical_id,
                output_key: key,
                unit,
            },
        );
    }

    if let Some(extension) = extension {
        let added = extension.extend(&handles, service).map_err(|e| {
            CoreError::Synthesis(format!("extension '{}' failed: {e}", extension.name()))
        })?;
        info!(
            "extension {} contributed {} resource(s)",
            extension.name(),
            added.len()
        );
        for (id, resource) in added {
            if stack.resources.contains_key(&id) {
                return Err(CoreError::Synthesis(format!(
                    "extension '{}' declares {id}, which is already declared",
                    extension.name()
                )));
            }
            stack.resources.insert(id, resource);
        }
    }

    let mut assembly = Assembly::new(&env.outdir);
    assembly.add_stack(stack);
    Ok(assembly)
}

fn file_digest(path: &Path) -> Option<String> {
    std::fs::read(path).ok().map(|data| asset_digest(&data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::DeclaredResources;
    use std::path::PathBuf;
    use stratus_schema::{parse_service_str, DeploymentTarget, LogicalId};

    fn context(root: &Path) -> EnvironmentContext {
        EnvironmentContext {
            target: DeploymentTarget {
                stage: "dev".to_owned(),
                region: "us-east-1".to_owned(),
                account_id: "123456789012".to_owned(),
                partition: "aws".to_owned(),
            },
            stack_name: "orders-dev".to_owned(),
            stack_tags: BTreeMap::new(),
            outdir: root.join(".stratus-assembly"),
            build_config_path: root.join("tsconfig.json"),
        }
    }

    fn synth(
        toml: &str,
        root: &Path,
        extension: Option<&dyn InfrastructureExtension>,
    ) -> Result<Assembly, CoreError> {
        let svc = parse_service_str(toml).unwrap();
        let locator = ArtifactLocator::new(root, &svc, root.join(".serverless"));
        synthesize(&svc, &context(root), &locator, extension)
    }

    #[test]
    fn declares_function_and_arn_output() {
        let root = PathBuf::from("/srv/orders");
        let assembly = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.my_func]
handler = "handler.main"
timeout = 10
"#,
            &root,
            None,
        )
        .unwrap();

        let stack = assembly.stack("orders-dev").unwrap();
        let id = LogicalId::new("my-func-ServerlessDeployedLambda");
        match &stack.resources[&id] {
            Resource::Function(unit) => {
                assert_eq!(unit.runtime, "nodejs12.x");
                assert_eq!(unit.timeout, Some(10));
                assert_eq!(
                    unit.code,
                    CodeSource::Asset {
                        path: "/srv/orders/.serverless/orders.zip".to_owned(),
                        digest: None,
                    }
                );
            }
            other => panic!("unexpected resource: {other:?}"),
        }
        let output = stack.outputs.values().next().unwrap();
        assert_eq!(stack.outputs.keys().next().unwrap(), "myfuncArn");
        assert_eq!(output.construct_id, "my-func-ServerlessDeployedLambda-arn");
        assert_eq!(output.value.resource, id);
        assert_eq!(output.value.attribute, "arn");
        assert_eq!(assembly.outdir, root.join(".stratus-assembly"));
    }

    #[test]
    fn function_runtime_overrides_provider() {
        let assembly = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.list]
handler = "list.handler"
runtime = "python3.8"
"#,
            Path::new("/srv"),
            None,
        )
        .unwrap();
        let stack = assembly.stack("orders-dev").unwrap();
        let Resource::Function(unit) = stack.resources.values().next().unwrap() else {
            panic!("expected a function");
        };
        assert_eq!(unit.runtime, "python3.8");
    }

    #[test]
    fn empty_function_runtime_falls_back_to_provider() {
        let assembly = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.list]
handler = "list.handler"
runtime = ""
"#,
            Path::new("/srv"),
            None,
        )
        .unwrap();
        let stack = assembly.stack("orders-dev").unwrap();
        let Resource::Function(unit) = stack.resources.values().next().unwrap() else {
            panic!("expected a function");
        };
        assert_eq!(unit.runtime, "nodejs12.x");
    }

    #[test]
    fn missing_runtime_fails_without_partial_result() {
        let err = synth(
            r#"
service = "orders"
[functions.list]
handler = "list.handler"
"#,
            Path::new("/srv"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Synthesis(_)));
        assert!(err.to_string().contains("list"));
    }

    #[test]
    fn readable_artifact_gets_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".serverless")).unwrap();
        std::fs::write(dir.path().join(".serverless/orders.zip"), b"zip").unwrap();

        let assembly = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.list]
handler = "list.handler"
"#,
            dir.path(),
            None,
        )
        .unwrap();
        let (_, _, digest) = assembly.stack("orders-dev").unwrap().assets().next().unwrap();
        assert_eq!(digest, Some(asset_digest(b"zip").as_str()));
    }

    #[test]
    fn teardown_functions_point_at_placeholder() {
        let svc = parse_service_str(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.list]
handler = "list.handler"
"#,
        )
        .unwrap()
        .with_teardown_artifacts();
        let root = Path::new("/srv");
        let locator = ArtifactLocator::new(root, &svc, root.join(".serverless"));
        let assembly = synthesize(&svc, &context(root), &locator, None).unwrap();
        let stack = assembly.stack("orders-dev").unwrap();
        let Resource::Function(unit) = stack.resources.values().next().unwrap() else {
            panic!("expected a function");
        };
        assert_eq!(unit.code, CodeSource::placeholder());
        assert_eq!(stack.assets().count(), 0);
    }

    #[test]
    fn colliding_output_keys_are_rejected() {
        let err = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.foo-bar]
handler = "a.handler"
[functions.foo_bar]
handler = "b.handler"
"#,
            Path::new("/srv"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Synthesis(_)));
        assert!(err.to_string().contains("foobarArn"));
    }

    #[test]
    fn extension_resources_are_appended() {
        let assembly = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.list]
handler = "list.handler"
[resources.OrdersQueue]
kind = "queue"
"#,
            Path::new("/srv"),
            Some(&DeclaredResources),
        )
        .unwrap();
        let stack = assembly.stack("orders-dev").unwrap();
        assert_eq!(stack.resources.len(), 2);
        assert_eq!(
            stack.resources[&LogicalId::new("OrdersQueue")].kind(),
            "queue"
        );
    }

    #[test]
    fn extension_may_not_redeclare_function_resource() {
        let err = synth(
            r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.list]
handler = "list.handler"
[resources.list-ServerlessDeployedLambda]
kind = "queue"
"#,
            Path::new("/srv"),
            Some(&DeclaredResources),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Synthesis(_)));
        assert!(err.to_string().contains("list-ServerlessDeployedLambda"));
    }

    #[test]
    fn identical_inputs_produce_identical_fingerprints() {
        let toml = r#"
service = "orders"
[provider]
runtime = "nodejs12.x"
[functions.b]
handler = "b.handler"
[functions.a]
handler = "a.handler"
environment = { Z = "1", A = "2" }
"#;
        let one = synth(toml, Path::new("/srv"), None).unwrap();
        let two = synth(toml, Path::new("/srv"), None).unwrap();
        let fp = |a: &Assembly| a.stack("orders-dev").unwrap().fingerprint().unwrap();
        assert_eq!(fp(&one), fp(&two));
    }
}
