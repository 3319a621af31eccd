use crate::CoreError;
use std::collections::BTreeMap;
use stratus_schema::{
    CanonicalName, ComputeUnit, LogicalId, OutputKey, Resource, ServiceDescription,
};

/// A synthesized function as seen by infrastructure extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeUnitHandle {
    pub function: String,
    pub canonical: CanonicalName,
    pub logical_id: LogicalId,
    pub output_key: OutputKey,
    pub unit: ComputeUnit,
}

/// Contributes extra resources to a stack after its functions are declared.
pub trait InfrastructureExtension: Send + Sync {
    fn name(&self) -> &str;

    /// Resources to add, keyed by logical id. Ids must not collide with the
    /// function resources or with each other.
    fn extend(
        &self,
        functions: &BTreeMap<String, ComputeUnitHandle>,
        service: &ServiceDescription,
    ) -> Result<Vec<(LogicalId, Resource)>, String>;
}

/// Appends the service description's `[resources.<id>]` tables verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredResources;

impl DeclaredResources {
    pub const NAME: &'static str = "declared-resources";
}

impl InfrastructureExtension for DeclaredResources {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn extend(
        &self,
        _functions: &BTreeMap<String, ComputeUnitHandle>,
        service: &ServiceDescription,
    ) -> Result<Vec<(LogicalId, Resource)>, String> {
        Ok(service
            .resources
            .iter()
            .map(|(id, declared)| {
                (
                    LogicalId::new(id.clone()),
                    Resource::Custom {
                        kind: declared.kind.clone(),
                        properties: declared.properties.clone(),
                    },
                )
            })
            .collect())
    }
}

/// Statically registered extensions, selected by `provider.extension`.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: BTreeMap<String, Box<dyn InfrastructureExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding [`DeclaredResources`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DeclaredResources));
        registry
    }

    pub fn register(&mut self, extension: Box<dyn InfrastructureExtension>) {
        self.extensions
            .insert(extension.name().to_owned(), extension);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&dyn InfrastructureExtension> {
        self.extensions.get(name).map(Box::as_ref)
    }

    /// The extension named by `name`, if any. Naming an unregistered
    /// extension is a configuration error.
    pub fn select(
        &self,
        name: Option<&str>,
    ) -> Result<Option<&dyn InfrastructureExtension>, CoreError> {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        self.get(name).map(Some).ok_or_else(|| {
            let known: Vec<&str> = self.names().collect();
            CoreError::Configuration(format!(
                "unknown infrastructure extension '{name}' (registered: {})",
                known.join(", ")
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_schema::parse_service_str;

    #[test]
    fn builtins_include_declared_resources() {
        let registry = ExtensionRegistry::with_builtins();
        assert_eq!(registry.names().collect::<Vec<_>>(), ["declared-resources"]);
        assert!(registry.select(None).unwrap().is_none());
        assert!(registry.select(Some("")).unwrap().is_none());
        let ext = registry.select(Some("declared-resources")).unwrap().unwrap();
        assert_eq!(ext.name(), "declared-resources");
    }

    #[test]
    fn unknown_extension_is_configuration_error() {
        let registry = ExtensionRegistry::with_builtins();
        let err = registry.select(Some("custom-vpc")).err().unwrap();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(err.to_string().contains("custom-vpc"));
    }

    #[test]
    fn declared_resources_are_copied_verbatim() {
        let svc = parse_service_str(
            r#"
service = "orders"
[resources.OrdersQueue]
kind = "queue"
properties = { visibility_timeout = 30 }
[resources.OrdersTable]
kind = "table"
"#,
        )
        .unwrap();
        let added = DeclaredResources.extend(&BTreeMap::new(), &svc).unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(added[0].0, "OrdersQueue");
        match &added[0].1 {
            Resource::Custom { kind, properties } => {
                assert_eq!(kind, "queue");
                assert_eq!(properties["visibility_timeout"], 30);
            }
            other => panic!("unexpected resource: {other:?}"),
        }
        assert_eq!(added[1].1.kind(), "table");
    }
}
