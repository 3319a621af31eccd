use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use stratus_schema::ServiceDescription;
use tracing::debug;

pub const DEFAULT_STAGE: &str = "dev";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TOOLKIT_STACK: &str = "CDKToolkit";
pub const DEFAULT_EXECUTION_POLICY: &str = "arn:aws:iam::aws:policy/AdministratorAccess";
pub const DEFAULT_BUILD_CONFIG: &str = "tsconfig.json";
pub const DEFAULT_PACKAGE_DIR: &str = ".serverless";

/// Per-invocation options given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationOptions {
    pub stage: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub aws_profile: Option<String>,
    pub account_id: Option<String>,
    pub partition: Option<String>,
    pub package: Option<String>,
    pub execution_policies: Vec<String>,
    /// Function targeted by a single-function update.
    pub function: Option<String>,
    pub update_config: bool,
}

/// Settings inherited from the invoking session (environment variables).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionConfig {
    pub stage: Option<String>,
    pub region: Option<String>,
    pub profile: Option<String>,
    pub account_id: Option<String>,
    pub partition: Option<String>,
    pub execution_policies: Vec<String>,
}

impl SessionConfig {
    /// Read `STRATUS_STAGE`, `STRATUS_REGION`, `STRATUS_PROFILE`,
    /// `STRATUS_ACCOUNT_ID`, `STRATUS_PARTITION` and
    /// `STRATUS_EXECUTION_POLICIES` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            stage: lookup("STRATUS_STAGE"),
            region: lookup("STRATUS_REGION"),
            profile: lookup("STRATUS_PROFILE"),
            account_id: lookup("STRATUS_ACCOUNT_ID"),
            partition: lookup("STRATUS_PARTITION"),
            execution_policies: lookup("STRATUS_EXECUTION_POLICIES")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// Whether a configured value counts as set.
pub trait Present {
    fn is_present(&self) -> bool;
}

impl Present for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Present for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl<K, V> Present for BTreeMap<K, V> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

type Accessor<'a, T> = Box<dyn Fn() -> Option<T> + 'a>;

/// A setting with its sources in precedence order.
pub struct Setting<'a, T> {
    name: &'static str,
    sources: Vec<(&'static str, Accessor<'a, T>)>,
}

impl<'a, T: Present> Setting<'a, T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sources: Vec::new(),
        }
    }

    #[must_use]
    pub fn source(mut self, origin: &'static str, read: impl Fn() -> Option<T> + 'a) -> Self {
        self.sources.push((origin, Box::new(read)));
        self
    }

    /// First present value, walking the sources in order.
    pub fn resolve(&self) -> Option<T> {
        for (origin, read) in &self.sources {
            if let Some(value) = read().filter(Present::is_present) {
                debug!("{} resolved from {origin}", self.name);
                return Some(value);
            }
        }
        None
    }

    pub fn resolve_or(&self, default: impl FnOnce() -> T) -> T {
        self.resolve().unwrap_or_else(|| {
            debug!("{} falls back to its default", self.name);
            default()
        })
    }
}

/// Resolves every setting of one invocation from, most specific first, the
/// invocation options, the session config, and the service's provider section.
pub struct ConfigResolver<'a> {
    root: &'a Path,
    service: &'a ServiceDescription,
    options: &'a InvocationOptions,
    session: &'a SessionConfig,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(
        root: &'a Path,
        service: &'a ServiceDescription,
        options: &'a InvocationOptions,
        session: &'a SessionConfig,
    ) -> Self {
        Self {
            root,
            service,
            options,
            session,
        }
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    pub fn service(&self) -> &ServiceDescription {
        self.service
    }

    pub fn stage(&self) -> String {
        Setting::new("stage")
            .source("option", || self.options.stage.clone())
            .source("session", || self.session.stage.clone())
            .source("provider", || self.service.provider.stage.clone())
            .resolve_or(|| DEFAULT_STAGE.to_owned())
    }

    pub fn region(&self) -> String {
        Setting::new("region")
            .source("option", || self.options.region.clone())
            .source("session", || self.session.region.clone())
            .source("provider", || self.service.provider.region.clone())
            .resolve_or(|| DEFAULT_REGION.to_owned())
    }

    /// Account id when configured explicitly; otherwise the caller looks up
    /// the default account of the active credentials.
    pub fn account_id(&self) -> Option<String> {
        Setting::new("account id")
            .source("option", || self.options.account_id.clone())
            .source("session", || self.session.account_id.clone())
            .source("provider", || self.service.provider.account_id.clone())
            .resolve()
    }

    pub fn partition(&self) -> Option<String> {
        Setting::new("partition")
            .source("option", || self.options.partition.clone())
            .source("session", || self.session.partition.clone())
            .source("provider", || self.service.provider.partition.clone())
            .resolve()
    }

    pub fn profile(&self) -> Option<String> {
        Setting::new("profile")
            .source("aws-profile option", || self.options.aws_profile.clone())
            .source("profile option", || self.options.profile.clone())
            .source("session", || self.session.profile.clone())
            .source("provider", || self.service.provider.profile.clone())
            .resolve()
    }

    pub fn stack_name(&self) -> String {
        Setting::new("stack name")
            .source("provider", || self.service.provider.stack_name.clone())
            .resolve_or(|| format!("{}-{}", self.service.service, self.stage()))
    }

    pub fn stack_tags(&self) -> BTreeMap<String, String> {
        Setting::new("stack tags")
            .source("provider", || Some(self.service.provider.stack_tags.clone()))
            .resolve_or(BTreeMap::new)
    }

    /// Role the control plane assumes for deploy and destroy.
    pub fn cfn_role(&self) -> Option<String> {
        Setting::new("execution role")
            .source("provider", || self.service.provider.cfn_role.clone())
            .resolve()
    }

    pub fn execution_policies(&self) -> Vec<String> {
        Setting::new("execution policies")
            .source("option", || Some(self.options.execution_policies.clone()))
            .source("session", || Some(self.session.execution_policies.clone()))
            .source("provider", || {
                Some(self.service.provider.execution_policies.clone())
            })
            .resolve_or(|| vec![DEFAULT_EXECUTION_POLICY.to_owned()])
    }

    pub fn deployment_bucket(&self) -> Option<String> {
        Setting::new("deployment bucket")
            .source("provider", || {
                self.service
                    .provider
                    .deployment_bucket
                    .as_ref()
                    .and_then(|b| b.name.clone())
            })
            .resolve()
    }

    /// Build configuration path; relative values are taken from the service
    /// root.
    pub fn build_config_path(&self) -> PathBuf {
        let configured = Setting::new("build config path")
            .source("provider", || self.service.provider.ts_config_path.clone())
            .resolve_or(|| DEFAULT_BUILD_CONFIG.to_owned());
        self.rooted(&configured)
    }

    /// Directory holding packaged artifacts.
    pub fn package_root(&self) -> PathBuf {
        Setting::new("package path")
            .source("option", || self.options.package.clone())
            .source("provider", || self.service.package.path.clone())
            .resolve()
            .map_or_else(|| self.root.join(DEFAULT_PACKAGE_DIR), |p| self.rooted(&p))
    }

    pub fn toolkit_stack_name(&self) -> String {
        Setting::new("toolkit stack name")
            .source("provider", || self.service.provider.toolkit_stack_name.clone())
            .resolve_or(|| DEFAULT_TOOLKIT_STACK.to_owned())
    }

    /// `path` as given when absolute, otherwise joined onto the service root.
    pub fn rooted(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_schema::parse_service_str;

    fn service(toml: &str) -> ServiceDescription {
        parse_service_str(toml).unwrap()
    }

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        let svc = service("service = \"orders\"\n");
        let options = InvocationOptions::default();
        let session = SessionConfig::default();
        let r = ConfigResolver::new(Path::new("/srv/orders"), &svc, &options, &session);

        assert_eq!(r.stage(), "dev");
        assert_eq!(r.region(), "us-east-1");
        assert_eq!(r.stack_name(), "orders-dev");
        assert!(r.stack_tags().is_empty());
        assert!(r.cfn_role().is_none());
        assert!(r.account_id().is_none());
        assert!(r.profile().is_none());
        assert!(r.deployment_bucket().is_none());
        assert_eq!(r.execution_policies(), [DEFAULT_EXECUTION_POLICY]);
        assert_eq!(r.toolkit_stack_name(), "CDKToolkit");
        assert_eq!(
            r.build_config_path(),
            PathBuf::from("/srv/orders/tsconfig.json")
        );
        assert_eq!(r.package_root(), PathBuf::from("/srv/orders/.serverless"));
    }

    #[test]
    fn option_beats_session_beats_provider() {
        let svc = service(
            r#"
service = "orders"
[provider]
stage = "provider-stage"
region = "eu-west-1"
"#,
        );
        let session = SessionConfig {
            stage: Some("session-stage".to_owned()),
            ..SessionConfig::default()
        };
        let mut options = InvocationOptions::default();
        let root = Path::new("/srv");

        assert_eq!(
            ConfigResolver::new(root, &svc, &options, &session).stage(),
            "session-stage"
        );
        options.stage = Some("prod".to_owned());
        let r = ConfigResolver::new(root, &svc, &options, &session);
        assert_eq!(r.stage(), "prod");
        assert_eq!(r.region(), "eu-west-1");
        assert_eq!(r.stack_name(), "orders-prod");
    }

    #[test]
    fn empty_values_are_not_present() {
        let svc = service(
            r#"
service = "orders"
[provider]
stage = ""
"#,
        );
        let options = InvocationOptions {
            region: Some(String::new()),
            ..InvocationOptions::default()
        };
        let session = SessionConfig::default();
        let r = ConfigResolver::new(Path::new("/srv"), &svc, &options, &session);
        assert_eq!(r.stage(), "dev");
        assert_eq!(r.region(), "us-east-1");
    }

    #[test]
    fn aws_profile_takes_precedence_over_profile() {
        let svc = service(
            r#"
service = "orders"
[provider]
profile = "from-provider"
"#,
        );
        let session = SessionConfig {
            profile: Some("from-session".to_owned()),
            ..SessionConfig::default()
        };
        let mut options = InvocationOptions {
            profile: Some("from-profile".to_owned()),
            ..InvocationOptions::default()
        };
        let root = Path::new("/srv");
        assert_eq!(
            ConfigResolver::new(root, &svc, &options, &session).profile(),
            Some("from-profile".to_owned())
        );
        options.aws_profile = Some("from-aws-profile".to_owned());
        assert_eq!(
            ConfigResolver::new(root, &svc, &options, &session).profile(),
            Some("from-aws-profile".to_owned())
        );
    }

    #[test]
    fn explicit_stack_name_ignores_stage() {
        let svc = service(
            r#"
service = "orders"
[provider]
stack_name = "orders-stack"
"#,
        );
        let options = InvocationOptions {
            stage: Some("prod".to_owned()),
            ..InvocationOptions::default()
        };
        let session = SessionConfig::default();
        let r = ConfigResolver::new(Path::new("/srv"), &svc, &options, &session);
        assert_eq!(r.stack_name(), "orders-stack");
    }

    #[test]
    fn execution_policies_from_session_list() {
        let session = SessionConfig::from_lookup(|key| match key {
            "STRATUS_EXECUTION_POLICIES" => Some("arn:a, arn:b,,".to_owned()),
            "STRATUS_REGION" => Some("ap-south-1".to_owned()),
            _ => None,
        });
        assert_eq!(session.execution_policies, ["arn:a", "arn:b"]);
        assert_eq!(session.region.as_deref(), Some("ap-south-1"));
        assert!(session.stage.is_none());

        let svc = service(
            r#"
service = "orders"
[provider]
execution_policies = ["arn:provider"]
"#,
        );
        let options = InvocationOptions::default();
        let r = ConfigResolver::new(Path::new("/srv"), &svc, &options, &session);
        assert_eq!(r.execution_policies(), ["arn:a", "arn:b"]);
    }

    #[test]
    fn paths_resolve_against_root_unless_absolute() {
        let svc = service(
            r#"
service = "orders"
[provider]
ts_config_path = "infra/tsconfig.build.json"
[package]
path = "/tmp/artifacts"
"#,
        );
        let options = InvocationOptions::default();
        let session = SessionConfig::default();
        let r = ConfigResolver::new(Path::new("/srv/orders"), &svc, &options, &session);
        assert_eq!(
            r.build_config_path(),
            PathBuf::from("/srv/orders/infra/tsconfig.build.json")
        );
        assert_eq!(r.package_root(), PathBuf::from("/tmp/artifacts"));

        let options = InvocationOptions {
            package: Some("dist".to_owned()),
            ..InvocationOptions::default()
        };
        let r = ConfigResolver::new(Path::new("/srv/orders"), &svc, &options, &session);
        assert_eq!(r.package_root(), PathBuf::from("/srv/orders/dist"));
    }

    #[test]
    fn deployment_bucket_and_role_come_from_provider() {
        let svc = service(
            r#"
service = "orders"
[provider]
cfn_role = "arn:aws:iam::123456789012:role/deployer"
[provider.deployment_bucket]
name = "orders-deployments"
[provider.stack_tags]
team = "payments"
"#,
        );
        let options = InvocationOptions::default();
        let session = SessionConfig::default();
        let r = ConfigResolver::new(Path::new("/srv"), &svc, &options, &session);
        assert_eq!(r.deployment_bucket().as_deref(), Some("orders-deployments"));
        assert_eq!(
            r.cfn_role().as_deref(),
            Some("arn:aws:iam::123456789012:role/deployer")
        );
        assert_eq!(r.stack_tags()["team"], "payments");
    }
}
